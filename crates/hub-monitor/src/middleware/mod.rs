//! HTTP middleware for the hub.
//!
//! - `http_metrics` - request metrics and tracing spans for every non-probe route

pub mod http_metrics;

pub use http_metrics::{http_metrics_middleware, HttpInstrumentation, HttpMetrics};
