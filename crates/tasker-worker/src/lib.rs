//! # tasker-worker
//!
//! The composition root for the workflow runtime: wires the event bus,
//! function registry, concurrency governor, step executor, DLQ handler,
//! and cron dispatcher from `tasker-runtime` together with the concrete
//! handlers from `tasker-workflows`, against either the in-memory
//! reference ports (`test-utils`, default-on) or an external backend a
//! deployment supplies instead. The `web-api` feature additionally
//! layers an `axum` HTTP ingress with health and metrics endpoints on
//! top of the composition root.

pub mod dlq_adapter;

#[cfg(feature = "test-utils")]
pub mod runtime;

#[cfg(all(feature = "web-api", feature = "test-utils"))]
pub mod http;

#[cfg(feature = "test-utils")]
pub mod testing;

#[cfg(feature = "test-utils")]
pub use runtime::Runtime;
