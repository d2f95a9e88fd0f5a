//! Resilient API client core for the Steward user-management frontend.
//!
//! Turns an unreliable, latency-variable HTTP backend into a dependable
//! request surface for feature code:
//!
//! - [`pipeline::RequestPipeline`] — the single sanctioned way to call the
//!   backend, composing bearer-token auth, circuit breaking, and
//!   retry/backoff around an injected [`transport::Transport`].
//! - [`auth::TokenRefresher`] — single-flight token renewal: any number of
//!   concurrent requests past the expiry skew share one renewal round-trip
//!   and observe the same outcome.
//! - [`resilience::CircuitBreaker`] — per-target failure tracking that
//!   converts a struggling dependency into instant, predictable rejections
//!   instead of a frozen UI.
//! - [`permissions::PermissionCache`] — synchronous, deny-by-default
//!   authorization checks backed by an atomically replaced snapshot.
//!
//! Collaborators (token store, transport, clock) are injected explicitly;
//! there are no ambient singletons, so lifetime and reset stay
//! controllable in tests.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod clock;
pub mod error;
pub mod permissions;
pub mod pipeline;
pub mod resilience;
pub mod testing;
pub mod transport;

// Re-export commonly used types for convenience
// ------------------------------------------------
pub use auth::{AuthError, AuthTokens, MemoryTokenStore, RefreshConfig, TokenRefresher, TokenStore};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ApiError, ErrorCategory};
pub use permissions::{
    PermissionCache, PermissionCacheConfig, PermissionCacheStats, PermissionSnapshot,
};
pub use pipeline::{PipelineConfig, RequestPipeline, RequestPipelineBuilder, RequestSpec, RetryPolicy};
pub use resilience::{
    BreakerError, BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, HttpTransportConfig, Method, Transport,
    TransportError,
};
