//! HTTP request handlers for the monitoring surface.

pub mod dashboard;
pub mod health;
pub mod metrics;

pub use dashboard::dashboard;
pub use health::{detailed_health, health_check, liveness, readiness};
pub use metrics::{metrics_json, metrics_text};
