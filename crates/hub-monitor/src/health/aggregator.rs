//! Health aggregation across all probes.

use chrono::Utc;
use common::error::HubError;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::probes::{
    probe_disk, probe_external_services, probe_memory, probe_realtime, probe_storage,
    ExternalService, MemorySource,
};
use super::{ComponentHealth, Components, HealthCheckResult};
use crate::realtime::ConnectionRegistry;
use crate::storage::Storage;

/// Default per-probe time limit.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub environment: String,
    pub version: String,
    pub scratch_dir: PathBuf,
    pub probe_timeout: Duration,
    pub external_services: Vec<ExternalService>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            scratch_dir: std::env::temp_dir(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            external_services: Vec::new(),
        }
    }
}

/// Runs every probe concurrently and folds the results into one report.
pub struct HealthAggregator {
    storage: Arc<dyn Storage>,
    memory: Arc<dyn MemorySource>,
    realtime: Option<Arc<dyn ConnectionRegistry>>,
    settings: HealthSettings,
    started_at: Instant,
}

impl HealthAggregator {
    pub fn new(
        storage: Arc<dyn Storage>,
        memory: Arc<dyn MemorySource>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            storage,
            memory,
            realtime: None,
            settings,
            started_at: Instant::now(),
        }
    }

    /// Include the realtime channel in detailed checks.
    #[must_use]
    pub fn with_realtime(mut self, realtime: Arc<dyn ConnectionRegistry>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Single storage round trip under the probe timeout.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or `HubError::Timeout` if the probe
    /// timeout elapses first.
    pub async fn ping(&self) -> Result<(), HubError> {
        let limit = self.settings.probe_timeout;
        match tokio::time::timeout(limit, self.storage.ping()).await {
            Ok(result) => result,
            Err(_) => Err(HubError::Timeout(format!(
                "storage ping timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Run all probes concurrently, each bounded by the probe timeout.
    pub async fn check(&self) -> HealthCheckResult {
        let limit = self.settings.probe_timeout;

        let (database, memory, disk, realtime_channel, external_services) = tokio::join!(
            bounded(limit, probe_storage(self.storage.as_ref())),
            bounded(limit, async { probe_memory(self.memory.as_ref()) }),
            bounded(limit, probe_disk(&self.settings.scratch_dir)),
            async {
                match &self.realtime {
                    Some(registry) => {
                        Some(bounded(limit, async { probe_realtime(registry.as_ref()) }).await)
                    }
                    None => None,
                }
            },
            bounded(limit, async {
                probe_external_services(&self.settings.external_services)
            }),
        );

        let components = Components {
            database,
            memory,
            disk,
            realtime_channel,
            external_services: Some(external_services),
        };
        let status = components.overall();
        debug!(target: "hub.health", status = status.as_str(), "Health check complete");

        HealthCheckResult {
            status,
            timestamp: Utc::now(),
            uptime_seconds: self.uptime().as_secs(),
            environment: self.settings.environment.clone(),
            version: self.settings.version.clone(),
            components,
        }
    }
}

/// Await a probe, reporting unhealthy if it outlives `limit`.
async fn bounded<F>(limit: Duration, probe: F) -> ComponentHealth
where
    F: Future<Output = ComponentHealth>,
{
    match tokio::time::timeout(limit, probe).await {
        Ok(health) => health,
        Err(_) => ComponentHealth::unhealthy(format!(
            "probe timed out after {}ms",
            limit.as_millis()
        )),
    }
}
