//! The request pipeline: the single call surface for all HTTP operations
//!
//! Composes token renewal, circuit breaking, and retry/backoff around the
//! transport in a fixed order (auth -> breaker -> retry -> transport), so
//! execution order is a designed invariant rather than an accident of
//! registration.

mod client;
mod spec;

pub use client::{PipelineConfig, RequestPipeline, RequestPipelineBuilder};
pub use spec::{RequestSpec, RetryPolicy};
