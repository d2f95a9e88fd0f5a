//! Single-flight token renewal
//!
//! Any number of concurrent requests can discover an expiring token at the
//! same moment; exactly one renewal round-trip may result. The in-flight
//! renewal is a [`Shared`] future kept in a mutex-guarded slot: the first
//! caller past the expiry skew creates it, every concurrent caller awaits
//! the same future, and all of them observe the identical outcome. The
//! slot is cleared once the flight settles so the next expiry starts a
//! fresh round.
//!
//! Renewal talks to the [`Transport`] directly rather than through the
//! request pipeline; routing it through the pipeline would recurse into
//! the token check.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::TokenStore;
use super::types::{AuthTokens, TokenResponse};
use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::transport::{HttpRequest, Method, Transport};

/// Terminal and transient renewal failures
///
/// `Expired` means the refresh token itself was rejected and the user must
/// log in again; `RefreshFailed` means the renewal could not complete for
/// transient reasons and may succeed later. The distinction is what lets
/// the UI choose between "redirect to login" and "try again later".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Refresh token rejected; session is over
    #[error("session expired, re-authentication required")]
    Expired,

    /// Renewal failed without invalidating the session
    #[error("token renewal failed: {0}")]
    RefreshFailed(String),

    /// No stored credentials to renew
    #[error("no stored credentials")]
    NotAuthenticated,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired | AuthError::NotAuthenticated => Self::AuthExpired,
            AuthError::RefreshFailed(message) => Self::AuthRefreshFailed(message),
        }
    }
}

/// Configuration for token renewal
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Absolute URL of the token endpoint
    pub token_url: String,
    /// Safety margin before true expiry at which renewal triggers
    pub expiry_skew: Duration,
    /// Extra attempts for network-level failures during renewal
    ///
    /// HTTP statuses are never retried here; a 401 from the token endpoint
    /// is terminal and anything else is surfaced as a transient failure.
    pub network_retries: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            token_url: "https://auth.steward.app/oauth/token".to_string(),
            expiry_skew: Duration::from_secs(30),
            network_retries: 1,
        }
    }
}

impl RefreshConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.token_url.is_empty() {
            return Err(ApiError::Config("token_url must not be empty".to_string()));
        }
        Ok(())
    }
}

type RenewalFlight = Shared<BoxFuture<'static, Result<AuthTokens, AuthError>>>;

/// Single-flight token refresher
///
/// Construct once per session and share via `Arc`; the pipeline owns one
/// and consults it before every attempt.
pub struct TokenRefresher<C: Clock = SystemClock> {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    config: RefreshConfig,
    clock: Arc<C>,
    in_flight: Mutex<Option<RenewalFlight>>,
}

impl TokenRefresher<SystemClock> {
    /// Create a refresher using the system clock
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        config: RefreshConfig,
    ) -> Self {
        Self::with_clock(store, transport, config, SystemClock)
    }
}

impl<C: Clock> TokenRefresher<C> {
    /// Create a refresher with a custom clock (useful for testing)
    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        config: RefreshConfig,
        clock: C,
    ) -> Self {
        Self { store, transport, config, clock: Arc::new(clock), in_flight: Mutex::new(None) }
    }

    /// Get tokens that are valid beyond the expiry skew
    ///
    /// The common path is a synchronous store read with no I/O. Once the
    /// remaining lifetime drops under the skew, callers join the single
    /// renewal flight.
    ///
    /// # Errors
    /// `AuthError::Expired` when the refresh token was rejected (the store
    /// has been cleared), `AuthError::RefreshFailed` for transient renewal
    /// failures, `AuthError::NotAuthenticated` when no session exists.
    pub async fn ensure_valid(&self) -> Result<AuthTokens, AuthError> {
        if let Some(tokens) = self.store.get() {
            if !tokens.expires_within(self.clock.now_utc(), self.config.expiry_skew) {
                return Ok(tokens);
            }
            debug!("access token within expiry skew, renewing");
        }
        self.renew().await
    }

    /// Renew regardless of remaining lifetime
    ///
    /// Used by the pipeline when a request came back 401 despite a token
    /// that looked fresh. Still single-flight: a renewal already in
    /// progress is joined, not duplicated.
    ///
    /// # Errors
    /// Same contract as [`ensure_valid`](Self::ensure_valid).
    pub async fn force_refresh(&self) -> Result<AuthTokens, AuthError> {
        debug!("forced token renewal requested");
        self.renew().await
    }

    /// Join the in-flight renewal or start a new one
    async fn renew(&self) -> Result<AuthTokens, AuthError> {
        let flight = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight token renewal");
                    existing.clone()
                }
                None => {
                    let flight = Self::run_renewal(
                        Arc::clone(&self.store),
                        Arc::clone(&self.transport),
                        self.config.clone(),
                        Arc::clone(&self.clock),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        // Clear the slot only if it still holds this flight; a later round
        // may already have replaced it.
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }
        drop(slot);

        outcome
    }

    /// The renewal round-trip itself
    ///
    /// Owns clones of every collaborator so the future is `'static` and
    /// can be shared between waiters.
    async fn run_renewal(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        config: RefreshConfig,
        clock: Arc<C>,
    ) -> Result<AuthTokens, AuthError> {
        let Some(current) = store.get() else {
            return Err(AuthError::NotAuthenticated);
        };

        let mut attempt = 0u32;
        loop {
            let mut request = HttpRequest::new(Method::Post, config.token_url.clone());
            request.headers.push(("Content-Type".to_string(), "application/json".to_string()));
            request.body = Some(serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": current.refresh_token,
            }));

            match transport.send(request).await {
                Ok(response) if response.is_success() => {
                    let payload: TokenResponse = response
                        .json()
                        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
                    let tokens =
                        payload.into_tokens(clock.now_utc(), &current.refresh_token);
                    store.set(tokens.clone());
                    info!("access token renewed");
                    return Ok(tokens);
                }
                Ok(response) if response.status == 401 || response.status == 403 => {
                    warn!(status = response.status, "refresh token rejected, clearing session");
                    store.clear();
                    return Err(AuthError::Expired);
                }
                Ok(response) => {
                    warn!(status = response.status, "token endpoint returned an error");
                    return Err(AuthError::RefreshFailed(format!(
                        "token endpoint returned status {}",
                        response.status
                    )));
                }
                Err(err) if attempt < config.network_retries => {
                    attempt += 1;
                    debug!(error = %err, attempt, "renewal network failure, retrying");
                }
                Err(err) => {
                    warn!(error = %err, "token renewal failed after bounded retries");
                    return Err(AuthError::RefreshFailed(err.to_string()));
                }
            }
        }
    }
}
