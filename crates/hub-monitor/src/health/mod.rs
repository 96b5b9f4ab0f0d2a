//! Health model, probes and aggregation.
//!
//! Component status ordering is `Healthy < Degraded < Unhealthy`, and the
//! overall status is the worst component status.

pub mod aggregator;
pub mod probes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::registry::{GaugeHandle, MetricRegistry, RegistryError};

pub use aggregator::{HealthAggregator, HealthSettings};
pub use probes::{ExternalService, MemorySource, MemoryUsage, ProcessMemory, StaticMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Value published on the component status gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Unhealthy => 2.0,
        }
    }
}

/// Worst status among `statuses`; `Healthy` when empty.
pub fn overall_status<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> HealthStatus {
    statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with_status(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            latency_ms: None,
            details: None,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, message)
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub database: ComponentHealth,
    pub memory: ComponentHealth,
    pub disk: ComponentHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_channel: Option<ComponentHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_services: Option<ComponentHealth>,
}

impl Components {
    /// `(component name, status)` for every present component.
    pub fn statuses(&self) -> Vec<(&'static str, HealthStatus)> {
        let mut statuses = vec![
            ("database", self.database.status),
            ("memory", self.memory.status),
            ("disk", self.disk.status),
        ];
        if let Some(realtime) = &self.realtime_channel {
            statuses.push(("realtime_channel", realtime.status));
        }
        if let Some(external) = &self.external_services {
            statuses.push(("external_services", external.status));
        }
        statuses
    }

    pub fn overall(&self) -> HealthStatus {
        overall_status(self.statuses().into_iter().map(|(_, status)| status))
    }
}

/// Detailed health report served on `/health/detailed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub environment: String,
    pub version: String,
    pub components: Components,
}

/// Component status gauge.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    component_status: GaugeHandle,
}

impl HealthMetrics {
    /// # Errors
    ///
    /// Returns `RegistryError` if the family conflicts with an existing one.
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            component_status: registry.register_gauge(
                &format!("{prefix}_health_component_status"),
                "Component health: 0 healthy, 1 degraded, 2 unhealthy",
                &["component"],
            )?,
        })
    }

    /// Publish every component status plus the overall status.
    pub fn publish(&self, result: &HealthCheckResult) {
        for (component, status) in result.components.statuses() {
            self.component_status
                .set(&[("component", component)], status.gauge_value());
        }
        self.component_status
            .set(&[("component", "overall")], result.status.gauge_value());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL: [HealthStatus; 3] = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
    ];

    fn component(status: HealthStatus) -> ComponentHealth {
        ComponentHealth::with_status(status, status.as_str())
    }

    #[test]
    fn test_overall_is_worst_component_for_every_combination() {
        for db in ALL {
            for memory in ALL {
                for disk in ALL {
                    for realtime in ALL {
                        for external in ALL {
                            let components = Components {
                                database: component(db),
                                memory: component(memory),
                                disk: component(disk),
                                realtime_channel: Some(component(realtime)),
                                external_services: Some(component(external)),
                            };
                            let statuses = [db, memory, disk, realtime, external];

                            let expected = if statuses.contains(&HealthStatus::Unhealthy) {
                                HealthStatus::Unhealthy
                            } else if statuses.contains(&HealthStatus::Degraded) {
                                HealthStatus::Degraded
                            } else {
                                HealthStatus::Healthy
                            };
                            assert_eq!(components.overall(), expected, "{statuses:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_optional_components_ignored_when_absent() {
        let components = Components {
            database: component(HealthStatus::Healthy),
            memory: component(HealthStatus::Degraded),
            disk: component(HealthStatus::Healthy),
            realtime_channel: None,
            external_services: None,
        };
        assert_eq!(components.statuses().len(), 3);
        assert_eq!(components.overall(), HealthStatus::Degraded);
        assert_eq!(overall_status(Vec::new()), HealthStatus::Healthy);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = HealthCheckResult {
            status: HealthStatus::Degraded,
            timestamp: Utc::now(),
            uptime_seconds: 12,
            environment: "test".into(),
            version: "0.1.0".into(),
            components: Components {
                database: ComponentHealth::healthy("ok").with_latency_ms(3),
                memory: component(HealthStatus::Degraded),
                disk: component(HealthStatus::Healthy),
                realtime_channel: Some(component(HealthStatus::Healthy)),
                external_services: None,
            },
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["uptimeSeconds"], 12);
        assert_eq!(json["components"]["database"]["latencyMs"], 3);
        assert_eq!(json["components"]["realtimeChannel"]["status"], "healthy");
        assert!(json["components"].get("externalServices").is_none());
        assert!(json["components"]["memory"].get("latencyMs").is_none());
    }

    #[test]
    fn test_publish_sets_component_gauges() {
        let registry = MetricRegistry::new();
        let metrics = HealthMetrics::register(&registry, "hub").unwrap();
        let result = HealthCheckResult {
            status: HealthStatus::Unhealthy,
            timestamp: Utc::now(),
            uptime_seconds: 0,
            environment: "test".into(),
            version: "0.1.0".into(),
            components: Components {
                database: component(HealthStatus::Unhealthy),
                memory: component(HealthStatus::Healthy),
                disk: component(HealthStatus::Degraded),
                realtime_channel: None,
                external_services: None,
            },
        };

        metrics.publish(&result);

        let snapshot = registry.export_json().unwrap();
        let status = |c: &str| snapshot.value("hub_health_component_status", &[("component", c)]);
        assert_eq!(status("database"), Some(2.0));
        assert_eq!(status("memory"), Some(0.0));
        assert_eq!(status("disk"), Some(1.0));
        assert_eq!(status("overall"), Some(2.0));
    }
}
