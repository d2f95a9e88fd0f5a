//! Keyed circuit breaker
//!
//! One independent failure-tracking state machine per logical target
//! (breaker key). Repeated failures trip the breaker open, converting
//! every further call into an instant rejection instead of another
//! request against a struggling dependency; after a cool-down the breaker
//! lets probes through and closes again once enough of them succeed.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests without executing them
    Open,
    /// Circuit is half-open, letting probes test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration shared by every key of a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen before closing the circuit
    pub success_threshold: u32,
    /// Time an open circuit waits before letting a probe through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.failure_threshold == 0 {
            return Err(ApiError::Config(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ApiError::Config(
                "success_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures before opening
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Consecutive half-open successes before closing
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Cool-down before an open circuit admits a probe
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, ApiError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Observability snapshot for one breaker key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures observed in the current Closed period
    pub consecutive_failures: u32,
    /// Consecutive successes observed in the current HalfOpen period
    pub consecutive_successes: u32,
}

/// Per-key mutable state
///
/// Mutated only inside synchronous map-guard sections; never held across
/// an await, which is what keeps transitions atomic under concurrency.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

/// Failures produced by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit is open; the operation was not invoked
    #[error("circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// The operation exceeded the enforced timeout
    #[error("operation timed out after {timeout:?}")]
    Timeout {
        /// The enforced timeout
        timeout: Duration,
    },

    /// The operation itself failed
    #[error("operation failed")]
    Operation {
        /// The wrapped operation's error
        #[source]
        source: E,
    },
}

/// Keyed circuit breaker
///
/// Cheap to share: per-key state lives in a concurrent map, so one
/// instance serves every backend target the client talks to.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    targets: DashMap<String, BreakerState>,
    clock: C,
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration and system clock
    ///
    /// # Errors
    /// Returns `ApiError::Config` for invalid thresholds.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ApiError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    ///
    /// # Errors
    /// Returns `ApiError::Config` for invalid thresholds.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ApiError> {
        config.validate()?;
        Ok(Self { config, targets: DashMap::new(), clock })
    }

    /// Execute an operation under breaker protection with a hard timeout
    ///
    /// The timeout is enforced here, independent of any transport-level
    /// timeout, so a hung connection cannot stall failure accounting. A
    /// timeout counts as a failure for state-machine purposes.
    ///
    /// # Errors
    /// `BreakerError::CircuitOpen` without invoking the operation when the
    /// circuit is open; `BreakerError::Timeout` when the deadline passes;
    /// `BreakerError::Operation` wrapping the operation's own error.
    pub async fn execute<F, Fut, T, E>(
        &self,
        key: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.admit(key) {
            debug!(key, "circuit breaker rejecting call");
            return Err(BreakerError::CircuitOpen);
        }

        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success(key);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure(key);
                Err(BreakerError::Operation { source: error })
            }
            Err(_) => {
                warn!(key, ?timeout, "operation timed out");
                self.record_failure(key);
                Err(BreakerError::Timeout { timeout })
            }
        }
    }

    /// Current state for a key, read-only
    ///
    /// Never transitions; an open circuit whose cool-down has elapsed still
    /// reads Open until the next call probes it.
    pub fn state(&self, key: &str) -> CircuitState {
        self.targets.get(key).map_or(CircuitState::Closed, |entry| entry.state)
    }

    /// Observability snapshot for a key, read-only
    pub fn stats(&self, key: &str) -> BreakerStats {
        self.targets.get(key).map_or(
            BreakerStats {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
            },
            |entry| BreakerStats {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                consecutive_successes: entry.consecutive_successes,
            },
        )
    }

    /// Force a key back to Closed with zeroed counters
    ///
    /// Administrative and test escape hatch only.
    pub fn reset(&self, key: &str) {
        if let Some(mut entry) = self.targets.get_mut(key) {
            *entry = BreakerState::default();
            debug!(key, "circuit breaker manually reset");
        }
    }

    /// Decide whether a call may proceed, transitioning Open -> HalfOpen
    /// once the cool-down has elapsed
    fn admit(&self, key: &str) -> bool {
        let mut entry = self.targets.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|opened_at| self.clock.now().duration_since(opened_at));
                if elapsed.is_some_and(|elapsed| elapsed >= self.config.reset_timeout) {
                    entry.state = CircuitState::HalfOpen;
                    entry.consecutive_successes = 0;
                    debug!(key, "circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, key: &str) {
        let mut entry = self.targets.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= self.config.success_threshold {
                    *entry = BreakerState::default();
                    debug!(key, "circuit breaker closed after successful probes");
                }
            }
            CircuitState::Open => {
                // A call admitted before the transition can settle after it;
                // the open state stands until a probe runs.
            }
        }
    }

    fn record_failure(&self, key: &str) {
        let mut entry = self.targets.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(self.clock.now());
                    warn!(
                        key,
                        failures = entry.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(self.clock.now());
                entry.consecutive_successes = 0;
                warn!(key, "circuit breaker reopened by failed probe");
            }
            CircuitState::Open => {}
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("targets", &self.targets.len())
            .finish()
    }
}
