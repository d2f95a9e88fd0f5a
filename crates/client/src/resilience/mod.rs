//! Resilience patterns shielding the UI from a failing backend
//!
//! Currently a keyed circuit breaker; the retry/backoff policy lives with
//! the request pipeline because it is per-request-class rather than
//! per-target.

mod circuit_breaker;

pub use circuit_breaker::{
    BreakerError, BreakerStats, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitState,
};
