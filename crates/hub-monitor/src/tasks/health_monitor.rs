//! Periodic health evaluation.
//!
//! Runs the detailed health check on an interval so the component status
//! gauges stay current between scrapes of `/health/detailed`.

use crate::health::{HealthAggregator, HealthMetrics, HealthStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Run one health check and publish the result to the status gauges.
pub(crate) async fn run_health_check(
    aggregator: &HealthAggregator,
    metrics: &HealthMetrics,
) -> HealthStatus {
    let result = aggregator.check().await;
    metrics.publish(&result);

    match result.status {
        HealthStatus::Healthy => {
            debug!(target: "hub.tasks", "Health check passed");
        }
        status => {
            let failing: Vec<&str> = result
                .components
                .statuses()
                .into_iter()
                .filter(|(_, s)| *s != HealthStatus::Healthy)
                .map(|(name, _)| name)
                .collect();
            warn!(
                target: "hub.tasks",
                status = status.as_str(),
                components = ?failing,
                "Service is not healthy"
            );
        }
    }
    result.status
}

/// Start the health monitor task.
#[instrument(skip_all, name = "hub.task.health_monitor")]
pub async fn start_health_monitor(
    aggregator: Arc<HealthAggregator>,
    metrics: HealthMetrics,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "hub.tasks",
        interval_seconds = interval.as_secs(),
        "Starting health monitor"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_health_check(&aggregator, &metrics).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "hub.tasks",
                    "Health monitor received shutdown signal, exiting"
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
    use crate::health::probes::StaticMemory;
    use crate::health::HealthSettings;
    use crate::observability::registry::MetricRegistry;
    use crate::storage::mock::MockStorage;

    fn aggregator(storage: MockStorage) -> Arc<HealthAggregator> {
        Arc::new(HealthAggregator::new(
            Arc::new(storage),
            Arc::new(StaticMemory::at_ratio(0.2)),
            HealthSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_run_publishes_component_gauges() {
        let registry = MetricRegistry::new();
        let metrics = HealthMetrics::register(&registry, "hub").unwrap();

        let status = run_health_check(&aggregator(MockStorage::failing()), &metrics).await;

        assert_eq!(status, HealthStatus::Unhealthy);
        let snapshot = registry.export_json().unwrap();
        assert_eq!(
            snapshot.value("hub_health_component_status", &[("component", "database")]),
            Some(2.0)
        );
        assert_eq!(
            snapshot.value("hub_health_component_status", &[("component", "overall")]),
            Some(2.0)
        );
        assert_eq!(
            snapshot.value("hub_health_component_status", &[("component", "memory")]),
            Some(0.0)
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unhealthy_warning_passes_default_filter() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(
                crate::config::DEFAULT_LOG_FILTER,
            ))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = MetricRegistry::new();
        let metrics = HealthMetrics::register(&registry, "hub").unwrap();
        run_health_check(&aggregator(MockStorage::failing()), &metrics).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("Service is not healthy"))
            .expect("warning should be logged");
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("hub.tasks"), "{line}");
        assert!(line.contains("database"), "{line}");
    }

    #[tokio::test]
    async fn test_monitor_exits_on_cancel() {
        let registry = MetricRegistry::new();
        let metrics = HealthMetrics::register(&registry, "hub").unwrap();
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(start_health_monitor(
            aggregator(MockStorage::healthy()),
            metrics,
            Duration::from_millis(10),
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should exit after cancel")
            .expect("task should not panic");

        let snapshot = registry.export_json().unwrap();
        assert!(snapshot
            .value("hub_health_component_status", &[("component", "overall")])
            .is_some());
    }
}
