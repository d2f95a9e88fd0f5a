//! Unified error taxonomy for the client core
//!
//! Every failure the pipeline can surface is a variant of [`ApiError`],
//! grouped into categories so UI code can pick a reaction (redirect to
//! login, show a retry button, show permission-denied, ignore) without
//! string-matching messages.

use std::time::Duration;

use thiserror::Error;

/// Failure categories surfaced to callers
///
/// Each category maps to one UI reaction, independent of the concrete
/// variant that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Session is gone; the user must authenticate again
    Auth,
    /// The backend is unhealthy (timeouts, 5xx, network, open breaker)
    DependencyHealth,
    /// The user is authenticated but not allowed (401 after a fresh token,
    /// 403)
    Authorization,
    /// The caller withdrew the request; not a health signal
    CallerIntent,
    /// The request spec or configuration was malformed; fails fast
    Contract,
}

/// Errors surfaced by the request pipeline and its collaborators
#[derive(Debug, Error)]
pub enum ApiError {
    /// The refresh token was rejected; re-authentication is required
    #[error("session expired, re-authentication required")]
    AuthExpired,

    /// Token renewal failed for transient reasons; worth retrying later
    #[error("token refresh failed: {0}")]
    AuthRefreshFailed(String),

    /// The circuit breaker for this target is open; the call was not sent
    #[error("circuit breaker open for target `{key}`")]
    CircuitOpen {
        /// Breaker key of the rejecting target
        key: String,
    },

    /// The operation exceeded the pipeline's hard timeout
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// The enforced timeout
        timeout: Duration,
    },

    /// The caller cancelled the request before completion
    #[error("request cancelled")]
    Cancelled,

    /// The backend rejected the credentials even after a forced renewal
    #[error("request rejected as unauthenticated")]
    Unauthenticated,

    /// The authenticated user lacks permission for this resource
    #[error("permission denied")]
    Forbidden,

    /// A network-level failure with no usable HTTP response
    #[error("network error: {0}")]
    Network(String),

    /// Any other HTTP error response
    #[error("{message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Stable machine-readable code derived from the status
        code: &'static str,
        /// Human-readable detail (body excerpt or summary)
        message: String,
    },

    /// A successful response carried a body the caller could not decode
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request spec violated the pipeline contract
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Component configuration was invalid
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Build the error for an HTTP error response
    ///
    /// 401 and 403 map to the authorization variants; everything else keeps
    /// the raw status plus a stable machine code.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden,
            _ => Self::Status { status, code: status_code_label(status), message },
        }
    }

    /// Get the failure category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthExpired | Self::AuthRefreshFailed(_) => ErrorCategory::Auth,
            Self::CircuitOpen { .. }
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::Status { .. }
            | Self::Decode(_) => ErrorCategory::DependencyHealth,
            Self::Unauthenticated | Self::Forbidden => ErrorCategory::Authorization,
            Self::Cancelled => ErrorCategory::CallerIntent,
            Self::InvalidRequest(_) | Self::Config(_) => ErrorCategory::Contract,
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthenticated => Some(401),
            Self::Forbidden => Some(403),
            _ => None,
        }
    }
}

/// Stable machine-readable label for an HTTP status
fn status_code_label(status: u16) -> &'static str {
    match status {
        400 => "bad_request",
        404 => "not_found",
        409 => "conflict",
        422 => "unprocessable",
        429 => "rate_limited",
        500 => "internal_error",
        502 => "bad_gateway",
        503 => "unavailable",
        504 => "gateway_timeout",
        s if s >= 500 => "server_error",
        s if s >= 400 => "client_error",
        _ => "unexpected_status",
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error taxonomy.
    use super::*;

    #[test]
    fn test_from_status_maps_auth_statuses() {
        assert!(matches!(ApiError::from_status(401, String::new()), ApiError::Unauthenticated));
        assert!(matches!(ApiError::from_status(403, String::new()), ApiError::Forbidden));
    }

    #[test]
    fn test_from_status_keeps_code_and_message() {
        let err = ApiError::from_status(503, "upstream down".to_string());
        match err {
            ApiError::Status { status, code, message } => {
                assert_eq!(status, 503);
                assert_eq!(code, "unavailable");
                assert_eq!(message, "upstream down");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn test_status_label_fallbacks() {
        assert_eq!(status_code_label(507), "server_error");
        assert_eq!(status_code_label(418), "client_error");
        assert_eq!(status_code_label(302), "unexpected_status");
    }

    #[test]
    fn test_categories() {
        assert_eq!(ApiError::AuthExpired.category(), ErrorCategory::Auth);
        assert_eq!(
            ApiError::AuthRefreshFailed("dns".to_string()).category(),
            ErrorCategory::Auth
        );
        assert_eq!(
            ApiError::CircuitOpen { key: "admin-api".to_string() }.category(),
            ErrorCategory::DependencyHealth
        );
        assert_eq!(
            ApiError::Timeout { timeout: Duration::from_secs(30) }.category(),
            ErrorCategory::DependencyHealth
        );
        assert_eq!(ApiError::Unauthenticated.category(), ErrorCategory::Authorization);
        assert_eq!(ApiError::Forbidden.category(), ErrorCategory::Authorization);
        assert_eq!(ApiError::Cancelled.category(), ErrorCategory::CallerIntent);
        assert_eq!(
            ApiError::InvalidRequest("empty path".to_string()).category(),
            ErrorCategory::Contract
        );
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ApiError::from_status(404, String::new()).status(), Some(404));
        assert_eq!(ApiError::Unauthenticated.status(), Some(401));
        assert_eq!(ApiError::Forbidden.status(), Some(403));
        assert_eq!(ApiError::Cancelled.status(), None);
    }
}
