//! Request pipeline implementation
//!
//! Per call: validate the spec, obtain a token (cheap path: a store read),
//! enter the breaker, send with a bearer header, renew once on the first
//! 401, classify the outcome, and re-attempt per the retry policy. The
//! pipeline returns a typed `Result` for every expected failure; only
//! contract violations fail before any I/O.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::spec::{RequestSpec, RetryPolicy};
use crate::auth::{AuthError, AuthTokens, RefreshConfig, TokenRefresher, TokenStore};
use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::resilience::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Configuration for the request pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL every spec path is appended to
    pub base_url: String,
    /// Hard per-attempt timeout enforced by the breaker
    pub request_timeout: Duration,
    /// Retry policy applied when a spec does not carry its own
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.steward.app/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.base_url.is_empty() {
            return Err(ApiError::Config("base_url must not be empty".to_string()));
        }
        self.retry.validate().map_err(|_| {
            ApiError::Config("default retry policy requires at least one attempt".to_string())
        })
    }
}

/// Failure of one attempt, before retry classification
#[derive(Debug, Error)]
enum AttemptError {
    /// Network-level failure; no HTTP response was received
    #[error(transparent)]
    Network(TransportError),

    /// An HTTP error response was received
    #[error("http status {status}")]
    Status {
        status: u16,
        body: String,
    },

    /// 401 even after a forced renewal; a genuine authorization failure
    #[error("credentials rejected after renewal")]
    AuthRejected,

    /// The forced renewal during 401 handling failed
    #[error(transparent)]
    Auth(AuthError),
}

/// The single call surface for all HTTP operations
///
/// Owns the token refresher and circuit breaker; feature code shares one
/// pipeline per backend via `Arc` and never talks to the transport
/// directly.
pub struct RequestPipeline<C: Clock = SystemClock> {
    transport: Arc<dyn Transport>,
    refresher: TokenRefresher<C>,
    breaker: CircuitBreaker<C>,
    config: PipelineConfig,
}

impl RequestPipeline<SystemClock> {
    /// Start building a pipeline with the system clock
    pub fn builder() -> RequestPipelineBuilder<SystemClock> {
        RequestPipelineBuilder::new()
    }
}

impl<C: Clock> RequestPipeline<C> {
    /// Issue a request without a cancellation signal
    ///
    /// # Errors
    /// A typed [`ApiError`] for every expected failure category; see
    /// [`ApiError::category`].
    pub async fn request(&self, spec: RequestSpec) -> Result<HttpResponse, ApiError> {
        self.request_with_cancel(spec, &CancellationToken::new()).await
    }

    /// Issue a request that the caller may cancel
    ///
    /// Cancellation is honored before each attempt and during backoff
    /// waits; it resolves to `ApiError::Cancelled` and is never recorded
    /// as a breaker failure. An attempt already in flight runs to
    /// completion so its outcome still feeds breaker accounting.
    ///
    /// # Errors
    /// Same contract as [`request`](Self::request).
    #[instrument(
        skip(self, spec, cancel),
        fields(method = %spec.method, path = %spec.path, breaker = %spec.breaker_key)
    )]
    pub async fn request_with_cancel(
        &self,
        spec: RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ApiError> {
        spec.validate()?;
        let retry = spec.retry.clone().unwrap_or_else(|| self.config.retry.clone());
        let url = format!("{}{}", self.config.base_url, spec.path);

        let mut attempts_made = 0u32;
        let mut refreshed_401 = false;

        loop {
            if cancel.is_cancelled() {
                debug!("request cancelled before attempt");
                return Err(ApiError::Cancelled);
            }

            let tokens = self.refresher.ensure_valid().await.map_err(ApiError::from)?;

            let outcome = self
                .breaker
                .execute(&spec.breaker_key, self.config.request_timeout, || {
                    self.attempt(&spec, &url, tokens, &mut refreshed_401)
                })
                .await;

            let (error, retryable) = match outcome {
                Ok(response) => {
                    debug!(status = response.status, "request succeeded");
                    return Ok(response);
                }
                Err(BreakerError::CircuitOpen) => {
                    warn!("circuit open, failing fast");
                    return Err(ApiError::CircuitOpen { key: spec.breaker_key.clone() });
                }
                // The breaker timeout means no response was received, so a
                // re-attempt is safe even for non-idempotent specs.
                Err(BreakerError::Timeout { timeout }) => (ApiError::Timeout { timeout }, true),
                Err(BreakerError::Operation { source }) => {
                    Self::classify(source, &spec, &retry, &url)
                }
            };

            attempts_made += 1;
            if !retryable || attempts_made >= retry.max_attempts {
                return Err(error);
            }

            let delay = retry.delay_for(attempts_made - 1);
            debug!(attempt = attempts_made, ?delay, error = %error, "backing off before re-attempt");
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("request cancelled during backoff");
                    return Err(ApiError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Issue a request and decode the JSON response body
    ///
    /// # Errors
    /// Any pipeline error, plus `ApiError::Decode` for malformed bodies.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        spec: RequestSpec,
    ) -> Result<T, ApiError> {
        let response = self.request(spec).await?;
        Self::decode(&response)
    }

    /// Convenience GET returning decoded JSON
    ///
    /// # Errors
    /// Same contract as [`request_json`](Self::request_json).
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        breaker_key: &str,
    ) -> Result<T, ApiError> {
        self.request_json(RequestSpec::get(path).with_breaker_key(breaker_key)).await
    }

    /// Convenience POST returning decoded JSON
    ///
    /// # Errors
    /// Same contract as [`request_json`](Self::request_json), plus
    /// `ApiError::InvalidRequest` when the body cannot be serialized.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        breaker_key: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("unserializable body: {e}")))?;
        self.request_json(RequestSpec::post(path, body).with_breaker_key(breaker_key)).await
    }

    /// The breaker, for health/status displays
    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    /// The token refresher, for login flows that want to prime a session
    pub fn refresher(&self) -> &TokenRefresher<C> {
        &self.refresher
    }

    /// One attempt: send with a bearer header, renewing once on the first
    /// 401 of the call
    async fn attempt(
        &self,
        spec: &RequestSpec,
        url: &str,
        tokens: AuthTokens,
        refreshed_401: &mut bool,
    ) -> Result<HttpResponse, AttemptError> {
        let mut access_token = tokens.access_token;

        loop {
            let request = Self::build_request(spec, url, &access_token);
            let response = self.transport.send(request).await.map_err(AttemptError::Network)?;

            if response.status == 401 {
                if *refreshed_401 {
                    warn!("still unauthorized after renewed credentials");
                    return Err(AttemptError::AuthRejected);
                }
                *refreshed_401 = true;
                debug!("401 received, forcing token renewal");
                let fresh =
                    self.refresher.force_refresh().await.map_err(AttemptError::Auth)?;
                access_token = fresh.access_token;
                continue;
            }

            if response.is_success() {
                return Ok(response);
            }

            return Err(AttemptError::Status {
                status: response.status,
                body: response.body_text(),
            });
        }
    }

    /// Map an attempt failure to its surfaced error and retry decision
    fn classify(
        source: AttemptError,
        spec: &RequestSpec,
        retry: &RetryPolicy,
        url: &str,
    ) -> (ApiError, bool) {
        match source {
            AttemptError::Network(err) => {
                // Non-idempotent requests are only re-sent when the failure
                // provably happened before the server saw them.
                let retryable = spec.idempotent || err.before_send();
                (ApiError::Network(err.to_string()), retryable)
            }
            AttemptError::Status { status, body } => {
                let retryable = spec.idempotent && retry.is_retryable_status(status);
                let message = if body.is_empty() {
                    format!("{url} returned status {status}")
                } else {
                    format!("{url} returned status {status}: {body}")
                };
                (ApiError::from_status(status, message), retryable)
            }
            AttemptError::AuthRejected => (ApiError::Unauthenticated, false),
            AttemptError::Auth(err) => (ApiError::from(err), false),
        }
    }

    fn build_request(spec: &RequestSpec, url: &str, access_token: &str) -> HttpRequest {
        let mut request = HttpRequest::new(spec.method, url);
        request
            .headers
            .push(("Authorization".to_string(), format!("Bearer {access_token}")));
        if spec.body.is_some() {
            request
                .headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }
        request.headers.extend(spec.headers.iter().cloned());
        request.body = spec.body.clone();
        request
    }

    fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
        // 204/205 carry no body by RFC; decode from JSON null so unit-like
        // response types still work.
        if response.status == 204 || response.status == 205 {
            serde_json::from_value(serde_json::Value::Null).map_err(|_| {
                ApiError::Decode(format!(
                    "status {} has no body, but the response type requires one",
                    response.status
                ))
            })
        } else {
            response.json()
        }
    }
}

/// Builder wiring the pipeline's collaborators together
///
/// Components are constructed explicitly with injected collaborators
/// (store, transport, clock) so lifetime and reset stay controllable in
/// tests; there are no ambient singletons.
pub struct RequestPipelineBuilder<C: Clock = SystemClock> {
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    config: PipelineConfig,
    refresh: RefreshConfig,
    breaker: CircuitBreakerConfig,
    clock: C,
}

impl RequestPipelineBuilder<SystemClock> {
    /// Start with defaults and the system clock
    pub fn new() -> Self {
        Self {
            transport: None,
            token_store: None,
            config: PipelineConfig::default(),
            refresh: RefreshConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            clock: SystemClock,
        }
    }
}

impl Default for RequestPipelineBuilder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RequestPipelineBuilder<C> {
    /// Set the transport capability (required)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the token store capability (required)
    pub fn token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(token_store);
        self
    }

    /// Set the pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the token renewal configuration
    pub fn refresh_config(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set the circuit breaker configuration
    pub fn breaker_config(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Swap in a custom clock (useful for testing)
    pub fn clock<C2: Clock>(self, clock: C2) -> RequestPipelineBuilder<C2> {
        RequestPipelineBuilder {
            transport: self.transport,
            token_store: self.token_store,
            config: self.config,
            refresh: self.refresh,
            breaker: self.breaker,
            clock,
        }
    }

    /// Build the pipeline
    ///
    /// # Errors
    /// `ApiError::Config` when a required collaborator is missing or any
    /// configuration fails validation.
    pub fn build(self) -> Result<RequestPipeline<C>, ApiError>
    where
        C: Clone,
    {
        let transport = self
            .transport
            .ok_or_else(|| ApiError::Config("transport not set".to_string()))?;
        let token_store = self
            .token_store
            .ok_or_else(|| ApiError::Config("token store not set".to_string()))?;

        self.config.validate()?;
        self.refresh.validate()?;

        let refresher = TokenRefresher::with_clock(
            token_store,
            Arc::clone(&transport),
            self.refresh,
            self.clock.clone(),
        );
        let breaker = CircuitBreaker::with_clock(self.breaker, self.clock)?;

        Ok(RequestPipeline { transport, refresher, breaker, config: self.config })
    }
}
