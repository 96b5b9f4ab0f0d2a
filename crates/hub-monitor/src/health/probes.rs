//! Individual health probes.
//!
//! Every probe returns a `ComponentHealth` and never an error: failures are
//! reported as a degraded or unhealthy component.

use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::debug;
use uuid::Uuid;

use super::{ComponentHealth, HealthStatus};
use crate::realtime::ConnectionRegistry;
use crate::storage::Storage;

/// Storage round trips faster than this are healthy.
pub const STORAGE_HEALTHY_LATENCY: Duration = Duration::from_millis(100);
/// Storage round trips faster than this (but not healthy) are degraded.
pub const STORAGE_DEGRADED_LATENCY: Duration = Duration::from_millis(500);

/// Memory usage ratio below which the process is healthy.
pub const MEMORY_HEALTHY_RATIO: f64 = 0.75;
/// Memory usage ratio below which the process is degraded.
pub const MEMORY_DEGRADED_RATIO: f64 = 0.90;

const CGROUP_V2_MEMORY_MAX: &str = "/sys/fs/cgroup/memory.max";
const CGROUP_V1_MEMORY_LIMIT: &str = "/sys/fs/cgroup/memory/memory.limit_in_bytes";

pub fn classify_storage_latency(latency: Duration) -> HealthStatus {
    if latency < STORAGE_HEALTHY_LATENCY {
        HealthStatus::Healthy
    } else if latency < STORAGE_DEGRADED_LATENCY {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Time one storage round trip.
pub async fn probe_storage(storage: &dyn Storage) -> ComponentHealth {
    let start = Instant::now();
    let result = storage.ping().await;
    let latency = start.elapsed();

    let health = match result {
        Ok(()) => match classify_storage_latency(latency) {
            HealthStatus::Healthy => ComponentHealth::healthy("Database responding normally"),
            HealthStatus::Degraded => ComponentHealth::degraded("Database responding slowly"),
            HealthStatus::Unhealthy => {
                ComponentHealth::unhealthy("Database response time exceeds threshold")
            }
        },
        Err(e) => ComponentHealth::unhealthy(format!("Database check failed: {e}")),
    };
    health.with_latency_ms(millis(latency))
}

/// Process memory use against the memory budget, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryUsage {
    /// Used over total; zero when the total is unknown.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.used_bytes as f64 / self.total_bytes as f64;
        ratio
    }
}

/// Source of memory usage figures.
pub trait MemorySource: Send + Sync {
    fn memory_usage(&self) -> MemoryUsage;
}

/// Resident memory of this process against its memory budget.
///
/// The budget is the configured limit if any, else the cgroup limit, else
/// host memory.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: Option<Pid>,
    limit_bytes: Option<u64>,
}

impl ProcessMemory {
    pub fn new(configured_limit: Option<u64>) -> Self {
        let limit_bytes = configured_limit.or_else(cgroup_memory_limit);
        debug!(target: "hub.health", limit_bytes, "Memory probe budget resolved");
        Self {
            pid: sysinfo::get_current_pid().ok(),
            limit_bytes,
        }
    }
}

impl MemorySource for ProcessMemory {
    fn memory_usage(&self) -> MemoryUsage {
        let mut system = System::new();
        let used_bytes = self
            .pid
            .filter(|pid| system.refresh_process(*pid))
            .and_then(|pid| system.process(pid))
            .map_or(0, |process| process.memory());
        let total_bytes = self.limit_bytes.unwrap_or_else(|| {
            system.refresh_memory();
            system.total_memory()
        });
        MemoryUsage {
            used_bytes,
            total_bytes,
        }
    }
}

/// Memory limit of the enclosing cgroup, if one is set.
fn cgroup_memory_limit() -> Option<u64> {
    [CGROUP_V2_MEMORY_MAX, CGROUP_V1_MEMORY_LIMIT]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .and_then(|raw| parse_cgroup_limit(&raw))
}

/// Parse a cgroup memory limit file. `max` and the cgroup v1 "unlimited"
/// sentinel (page-rounded `i64::MAX`) mean no limit.
pub(crate) fn parse_cgroup_limit(raw: &str) -> Option<u64> {
    const V1_UNLIMITED: u64 = 0x7FFF_FFFF_FFFF_F000;
    match raw.trim() {
        "max" => None,
        value => value
            .parse::<u64>()
            .ok()
            .filter(|limit| *limit > 0 && *limit < V1_UNLIMITED),
    }
}

/// Fixed figures, for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticMemory(pub MemoryUsage);

impl StaticMemory {
    pub fn at_ratio(ratio: f64) -> Self {
        let total_bytes = 1_000_000;
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let used_bytes = (ratio * total_bytes as f64) as u64;
        Self(MemoryUsage {
            used_bytes,
            total_bytes,
        })
    }
}

impl MemorySource for StaticMemory {
    fn memory_usage(&self) -> MemoryUsage {
        self.0
    }
}

pub fn classify_memory(ratio: f64) -> HealthStatus {
    if ratio < MEMORY_HEALTHY_RATIO {
        HealthStatus::Healthy
    } else if ratio < MEMORY_DEGRADED_RATIO {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

pub fn probe_memory(source: &dyn MemorySource) -> ComponentHealth {
    let usage = source.memory_usage();
    let ratio = usage.ratio();
    let percent = (ratio * 1000.0).round() / 10.0;

    let health = match classify_memory(ratio) {
        HealthStatus::Healthy => ComponentHealth::healthy("Memory usage normal"),
        HealthStatus::Degraded => ComponentHealth::degraded("Memory usage elevated"),
        HealthStatus::Unhealthy => ComponentHealth::unhealthy("Memory usage critical"),
    };
    health.with_details(json!({
        "usedBytes": usage.used_bytes,
        "totalBytes": usage.total_bytes,
        "usagePercent": percent,
    }))
}

/// Write and remove a scratch file under `scratch_dir`.
pub async fn probe_disk(scratch_dir: &Path) -> ComponentHealth {
    let path = scratch_dir.join(format!(".hub-health-{}", Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&path, b"ok").await {
        return ComponentHealth::unhealthy(format!("Disk write failed: {e}"));
    }
    if let Err(e) = tokio::fs::remove_file(&path).await {
        return ComponentHealth::unhealthy(format!("Disk cleanup failed: {e}"));
    }
    ComponentHealth::healthy("Disk read/write operational")
}

pub fn probe_realtime(registry: &dyn ConnectionRegistry) -> ComponentHealth {
    match registry.connected_clients() {
        Ok(count) => ComponentHealth::healthy(format!("{count} clients connected"))
            .with_details(json!({ "connectedClients": count })),
        Err(e) => ComponentHealth::degraded(format!("Realtime channel status unavailable: {e}")),
    }
}

/// An outbound integration and whether it has credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalService {
    pub name: &'static str,
    pub configured: bool,
}

/// Healthy when at least one integration is configured.
pub fn probe_external_services(services: &[ExternalService]) -> ComponentHealth {
    let details: serde_json::Map<String, serde_json::Value> = services
        .iter()
        .map(|s| (s.name.to_string(), json!(s.configured)))
        .collect();
    let configured = services.iter().filter(|s| s.configured).count();

    let health = if configured > 0 {
        ComponentHealth::healthy(format!(
            "{configured} of {} external services configured",
            services.len()
        ))
    } else {
        ComponentHealth::degraded("No external services configured")
    };
    health.with_details(serde_json::Value::Object(details))
}
