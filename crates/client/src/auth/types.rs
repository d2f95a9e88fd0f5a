//! Bearer token types
//!
//! [`AuthTokens`] is the stored credential set; [`TokenResponse`] is the
//! RFC 6749-shaped payload the token endpoint returns on renewal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access and refresh tokens with their absolute expiry
///
/// Owned exclusively by the [`TokenStore`](super::TokenStore); written only
/// by the refresher (on renewal) and the host's login/logout flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Bearer token attached to every request
    pub access_token: String,
    /// Long-lived token used to obtain new access tokens
    pub refresh_token: String,
    /// Absolute expiration timestamp of the access token (UTC)
    pub expires_at: DateTime<Utc>,
}

impl AuthTokens {
    /// Create a token set with an absolute expiry
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Whether the access token expires within `skew` of `now`
    ///
    /// Renewal must happen once this returns true; using a token past
    /// `expires_at - skew` risks a 401 mid-flight.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match chrono::Duration::from_std(skew) {
            Ok(skew) => now + skew >= self.expires_at,
            // A skew too large to represent always triggers renewal.
            Err(_) => true,
        }
    }

    /// Seconds until expiry relative to `now` (negative if already expired)
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }
}

/// Token endpoint response (RFC 6749 §5.1)
///
/// `expires_in` is a relative lifetime; conversion to [`AuthTokens`] pins
/// it against the injected clock so tests stay deterministic.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// New access token
    pub access_token: String,
    /// New refresh token; providers that do not rotate omit it
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl TokenResponse {
    /// Convert to a stored token set, carrying the previous refresh token
    /// forward when the provider did not rotate it
    pub fn into_tokens(self, now: DateTime<Utc>, previous_refresh: &str) -> AuthTokens {
        let refresh_token = self.refresh_token.unwrap_or_else(|| previous_refresh.to_string());
        AuthTokens {
            access_token: self.access_token,
            refresh_token,
            expires_at: now + chrono::Duration::seconds(self.expires_in.max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for token types.
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn test_expires_within_skew() {
        let tokens = AuthTokens::new("a", "r", at(900));

        // 500s in: 400s of lifetime left, well past the 30s skew.
        assert!(!tokens.expires_within(at(500), Duration::from_secs(30)));

        // 870s in: only 30s left, equal to the skew boundary.
        assert!(tokens.expires_within(at(870), Duration::from_secs(30)));

        // Past expiry.
        assert!(tokens.expires_within(at(901), Duration::from_secs(30)));
    }

    #[test]
    fn test_seconds_until_expiry() {
        let tokens = AuthTokens::new("a", "r", at(900));
        assert_eq!(tokens.seconds_until_expiry(at(0)), 900);
        assert_eq!(tokens.seconds_until_expiry(at(950)), -50);
    }

    #[test]
    fn test_token_response_conversion() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: 900,
        };

        let tokens = response.into_tokens(at(100), "old-refresh");
        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token, "new-refresh");
        assert_eq!(tokens.expires_at, at(1000));
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: 900,
        };

        let tokens = response.into_tokens(at(0), "old-refresh");
        assert_eq!(tokens.refresh_token, "old-refresh");
    }

    #[test]
    fn test_negative_lifetime_clamps_to_now() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: -60,
        };

        let tokens = response.into_tokens(at(100), "r");
        assert_eq!(tokens.expires_at, at(100));
    }
}
