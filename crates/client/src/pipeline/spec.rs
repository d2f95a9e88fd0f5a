//! Request specifications and retry policy
//!
//! A [`RequestSpec`] describes one logical call; a [`RetryPolicy`] is the
//! immutable per-request-class value object governing how the pipeline
//! re-attempts it. Feature code builds both once and never mutates them.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

use crate::error::ApiError;
use crate::transport::Method;

/// Immutable retry policy for one class of requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (must be at least 1)
    pub max_attempts: u32,
    /// Delay before the first re-attempt
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay
    pub max_delay: Duration,
    /// HTTP statuses that indicate a transient condition
    pub retryable_statuses: HashSet<u16>,
    /// Randomize each delay by ±20% to avoid synchronized re-attempts
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            retryable_statuses: [429, 502, 503, 504].into_iter().collect(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never re-attempts
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.max_attempts == 0 {
            return Err(ApiError::InvalidRequest(
                "retry policy requires at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether an HTTP status is transient under this policy
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Backoff before re-attempt number `attempt` (0-based)
    ///
    /// Exponential doubling from `base_delay`, capped at `max_delay`, with
    /// optional ±20% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let scaled = base.saturating_mul(2u64.saturating_pow(attempt));
        let capped = scaled.min(self.max_delay.as_millis() as u64);

        let millis = if self.jitter && capped > 0 {
            let factor = rand::thread_rng().gen_range(0.8..=1.2);
            (capped as f64 * factor) as u64
        } else {
            capped
        };

        Duration::from_millis(millis)
    }
}

/// One logical request, created per call and never mutated by the pipeline
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method
    pub method: Method,
    /// Path appended to the pipeline's base URL (must start with `/`)
    pub path: String,
    /// Extra headers beyond the ones the pipeline injects
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<serde_json::Value>,
    /// Per-request retry policy; the pipeline default applies when absent
    pub retry: Option<RetryPolicy>,
    /// Breaker key identifying the logical backend target
    pub breaker_key: String,
    /// Whether the request is safe to re-send after it may have reached
    /// the server
    pub idempotent: bool,
}

impl RequestSpec {
    /// Default breaker key for requests that do not name a target
    pub const DEFAULT_BREAKER_KEY: &'static str = "api";

    /// Create a spec; idempotence defaults from the method
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            retry: None,
            breaker_key: Self::DEFAULT_BREAKER_KEY.to_string(),
            idempotent: method.is_idempotent(),
        }
    }

    /// GET spec
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST spec with a JSON body
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// PUT spec with a JSON body
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// DELETE spec
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Route through a named breaker target
    pub fn with_breaker_key(mut self, key: impl Into<String>) -> Self {
        self.breaker_key = key.into();
        self
    }

    /// Override the pipeline's default retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Override the method-derived idempotence flag
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Contract validation, run before any I/O
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.path.is_empty() || !self.path.starts_with('/') {
            return Err(ApiError::InvalidRequest(format!(
                "path must start with '/', got `{}`",
                self.path
            )));
        }
        if self.breaker_key.is_empty() {
            return Err(ApiError::InvalidRequest("breaker key must not be empty".to_string()));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}
