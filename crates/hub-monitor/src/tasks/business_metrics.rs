//! Periodic refresh of activity gauges from storage.
//!
//! Active user counts per window and the active session count are read from
//! storage and written to their gauges. A failed refresh is logged and the
//! previous gauge values stay in place.

use crate::observability::business::{ActivityWindow, BusinessMetrics};
use crate::storage::Storage;
use chrono::Utc;
use common::error::HubError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Refresh every activity gauge once.
///
/// # Errors
///
/// Returns the first storage error; gauges already updated keep their new value.
pub async fn update_business_metrics(
    storage: &dyn Storage,
    metrics: &BusinessMetrics,
) -> Result<(), HubError> {
    let now = Utc::now();
    for window in ActivityWindow::ALL {
        let since = now
            - chrono::Duration::from_std(window.duration())
                .map_err(|e| HubError::Internal(format!("invalid activity window: {e}")))?;
        let count = storage.count_active_users(since).await?;
        metrics.set_active_users(window, count);
    }

    let sessions = storage.count_active_sessions().await?;
    metrics.set_active_sessions(sessions);

    debug!(target: "hub.tasks", sessions, "Activity gauges refreshed");
    Ok(())
}

/// Start the activity gauge updater.
///
/// Runs one refresh per `interval` tick (the first immediately) until
/// `cancel_token` is cancelled.
#[instrument(skip_all, name = "hub.task.business_metrics")]
pub async fn start_business_metrics_updater(
    storage: Arc<dyn Storage>,
    metrics: BusinessMetrics,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "hub.tasks",
        interval_seconds = interval.as_secs(),
        "Starting business metrics updater"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = update_business_metrics(storage.as_ref(), &metrics).await {
                    warn!(
                        target: "hub.tasks",
                        error = %e,
                        "Failed to refresh activity gauges"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "hub.tasks",
                    "Business metrics updater received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::registry::MetricRegistry;
    use crate::storage::mock::MockStorage;

    fn setup() -> (MetricRegistry, BusinessMetrics) {
        let registry = MetricRegistry::new();
        let metrics = BusinessMetrics::register(&registry, "hub").unwrap();
        (registry, metrics)
    }

    #[tokio::test]
    async fn test_update_sets_every_window() {
        let (registry, metrics) = setup();
        let storage = MockStorage::healthy();
        storage.set_active_users(12);
        storage.set_active_sessions(5);

        update_business_metrics(&storage, &metrics).await.unwrap();

        let snapshot = registry.export_json().unwrap();
        for window in ["5m", "1h", "24h"] {
            assert_eq!(
                snapshot.value("hub_active_users", &[("window", window)]),
                Some(12.0),
                "window {window}"
            );
        }
        assert_eq!(snapshot.value("hub_active_sessions", &[]), Some(5.0));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_values() {
        let (registry, metrics) = setup();
        let storage = MockStorage::healthy();
        storage.set_active_sessions(3);
        update_business_metrics(&storage, &metrics).await.unwrap();

        storage.set_failing(true);
        storage.set_active_sessions(9);
        let result = update_business_metrics(&storage, &metrics).await;

        assert!(matches!(result, Err(HubError::Database(_))));
        let snapshot = registry.export_json().unwrap();
        assert_eq!(snapshot.value("hub_active_sessions", &[]), Some(3.0));
    }

    #[tokio::test]
    async fn test_updater_exits_on_cancel() {
        let (_registry, metrics) = setup();
        let storage: Arc<dyn Storage> = Arc::new(MockStorage::healthy());
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(start_business_metrics_updater(
            storage,
            metrics,
            Duration::from_millis(10),
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should exit after cancel")
            .expect("task should not panic");
    }
}
