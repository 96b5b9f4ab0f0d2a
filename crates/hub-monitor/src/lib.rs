//! Sandwich Hub monitoring library.
//!
//! Observability for the coordination hub: a metric registry with
//! Prometheus and JSON exposition, HTTP and storage instrumentation,
//! domain event counters, and tiered health checks.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> health/*, observability/*
//! middleware/http_metrics.rs -> observability::registry
//! instrumentation::Instrumented<S> -> storage::Storage
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Endpoint error types with HTTP status code mapping
//! - `handlers` - Metrics, health and dashboard handlers
//! - `health` - Component probes and the health aggregator
//! - `instrumentation` - Storage operation timing and the transparent proxy
//! - `middleware` - HTTP request instrumentation
//! - `observability` - Metric registry, route normalization, tracing seam
//! - `realtime` - Realtime connection tracking
//! - `routes` - Axum router setup
//! - `storage` - Storage collaborator trait and implementations
//! - `tasks` - Background metric and health refresh loops

pub mod config;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod instrumentation;
pub mod middleware;
pub mod observability;
pub mod realtime;
pub mod routes;
pub mod storage;
pub mod tasks;
