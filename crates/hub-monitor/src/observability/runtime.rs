//! Process and async runtime gauges.

use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::debug;

use super::registry::{GaugeHandle, HistogramHandle, MetricRegistry, RegistryError};

const LAG_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

#[derive(Debug, Clone)]
pub struct RuntimeMetrics {
    resident_memory: GaugeHandle,
    virtual_memory: GaugeHandle,
    uptime: GaugeHandle,
    alive_tasks: GaugeHandle,
    workers: GaugeHandle,
    scheduler_lag: HistogramHandle,
    started_at: Instant,
    pid: Option<Pid>,
}

impl RuntimeMetrics {
    /// # Errors
    ///
    /// Returns `RegistryError` if any family conflicts with an existing one.
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            resident_memory: registry.register_gauge(
                &format!("{prefix}_process_resident_memory_bytes"),
                "Resident memory of this process in bytes",
                &[],
            )?,
            virtual_memory: registry.register_gauge(
                &format!("{prefix}_process_virtual_memory_bytes"),
                "Virtual memory of this process in bytes",
                &[],
            )?,
            uptime: registry.register_gauge(
                &format!("{prefix}_process_uptime_seconds"),
                "Seconds since the process started",
                &[],
            )?,
            alive_tasks: registry.register_gauge(
                &format!("{prefix}_runtime_alive_tasks"),
                "Tasks currently alive on the async runtime",
                &[],
            )?,
            workers: registry.register_gauge(
                &format!("{prefix}_runtime_workers"),
                "Worker threads of the async runtime",
                &[],
            )?,
            scheduler_lag: registry.register_histogram(
                &format!("{prefix}_runtime_scheduler_lag_seconds"),
                "Timer wake-up delay beyond the requested interval",
                &[],
                LAG_BUCKETS,
            )?,
            started_at: Instant::now(),
            pid: sysinfo::get_current_pid().ok(),
        })
    }

    /// Take one sample of process and runtime state.
    ///
    /// `scheduler_lag` is how late the sampler's own timer fired.
    pub fn sample(&self, scheduler_lag: Duration) {
        self.uptime
            .set(&[], self.started_at.elapsed().as_secs_f64());
        self.scheduler_lag.observe_duration(&[], scheduler_lag);

        if let Some(pid) = self.pid {
            let mut system = System::new();
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    #[allow(clippy::cast_precision_loss)]
                    {
                        self.resident_memory.set(&[], process.memory() as f64);
                        self.virtual_memory.set(&[], process.virtual_memory() as f64);
                    }
                }
            } else {
                debug!(target: "hub.tasks", "Process entry not found, memory gauges skipped");
            }
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let metrics = handle.metrics();
            #[allow(clippy::cast_precision_loss)]
            {
                self.alive_tasks.set(&[], metrics.num_alive_tasks() as f64);
                self.workers.set(&[], metrics.num_workers() as f64);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_populates_gauges() {
        let registry = MetricRegistry::new();
        let runtime = RuntimeMetrics::register(&registry, "hub").unwrap();

        runtime.sample(Duration::from_millis(3));

        let snapshot = registry.export_json().unwrap();
        assert!(snapshot.value("hub_process_uptime_seconds", &[]).is_some());
        assert!(snapshot.value("hub_runtime_workers", &[]).unwrap() >= 1.0);
        assert_eq!(
            snapshot.value("hub_runtime_scheduler_lag_seconds_count", &[]),
            Some(1.0)
        );
        assert!(snapshot.value("hub_process_resident_memory_bytes", &[]).unwrap() > 0.0);
    }
}
