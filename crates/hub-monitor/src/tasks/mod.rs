//! Background tasks for the monitoring service.
//!
//! Each task runs on its own interval and exits when its cancellation token
//! is triggered.

pub mod business_metrics;
pub mod health_monitor;
pub mod runtime_sampler;

pub use business_metrics::start_business_metrics_updater;
pub use health_monitor::start_health_monitor;
pub use runtime_sampler::start_runtime_sampler;
