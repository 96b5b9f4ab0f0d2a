//! Periodic process and runtime sampling.
//!
//! Scheduler lag is how late the sampler's own sleep returns: a busy or
//! blocked runtime wakes the task late.

use crate::observability::runtime::RuntimeMetrics;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Start the runtime sampler task.
#[instrument(skip_all, name = "hub.task.runtime_sampler")]
pub async fn start_runtime_sampler(
    metrics: RuntimeMetrics,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "hub.tasks",
        interval_seconds = interval.as_secs(),
        "Starting runtime sampler"
    );

    metrics.sample(Duration::ZERO);

    loop {
        let scheduled = Instant::now() + interval;
        tokio::select! {
            _ = tokio::time::sleep_until(scheduled) => {
                let lag = Instant::now().saturating_duration_since(scheduled);
                metrics.sample(lag);
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "hub.tasks",
                    "Runtime sampler received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
