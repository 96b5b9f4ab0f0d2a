//! Observability for the coordination hub.
//!
//! `Telemetry` bundles the registry with every metric family the service
//! records, so a single value can be threaded through startup.

pub mod business;
pub mod exposition;
pub mod registry;
pub mod route;
pub mod runtime;
pub mod tracer;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::health::HealthMetrics;
use crate::instrumentation::{OperationInstrumentation, OperationMetrics};
use crate::middleware::{HttpInstrumentation, HttpMetrics};
use business::BusinessMetrics;
use registry::{MetricRegistry, RegistryError};
use runtime::RuntimeMetrics;
use tracer::SharedTracer;

/// Registry plus the metric families and tracer shared by all instrumentation.
#[derive(Clone)]
pub struct Telemetry {
    pub registry: MetricRegistry,
    pub http: HttpMetrics,
    pub operations: OperationMetrics,
    pub business: BusinessMetrics,
    pub health: HealthMetrics,
    pub runtime: RuntimeMetrics,
    pub tracer: SharedTracer,
}

impl Telemetry {
    /// Create a fresh registry and register every family under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the prefix produces invalid metric names.
    pub fn init(prefix: &str, tracer: SharedTracer) -> Result<Self, RegistryError> {
        let registry = MetricRegistry::new();
        Ok(Self {
            http: HttpMetrics::register(&registry, prefix)?,
            operations: OperationMetrics::register(&registry, prefix)?,
            business: BusinessMetrics::register(&registry, prefix)?,
            health: HealthMetrics::register(&registry, prefix)?,
            runtime: RuntimeMetrics::register(&registry, prefix)?,
            registry,
            tracer,
        })
    }

    pub fn http_instrumentation(&self, slow_threshold: Duration) -> HttpInstrumentation {
        HttpInstrumentation::new(self.http.clone(), Arc::clone(&self.tracer), slow_threshold)
    }

    pub fn operation_instrumentation(&self, slow_threshold: Duration) -> OperationInstrumentation {
        OperationInstrumentation::new(
            self.operations.clone(),
            Arc::clone(&self.tracer),
            slow_threshold,
        )
    }
}

/// Run an instrumentation call, containing any panic it raises.
///
/// Returns `None` when the call panicked. The panic is logged and the
/// observation is lost; the request or operation being observed continues.
pub fn contain<T, F: FnOnce() -> T>(context: &'static str, call: F) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(
                target: "hub.metrics",
                context,
                "Instrumentation panicked, observation dropped"
            );
            None
        }
    }
}

/// Run a recording closure, containing any panic it raises.
pub fn observe_safely<F: FnOnce()>(context: &'static str, record: F) {
    let _ = contain(context, record);
}

/// Last path segment of a type name, without generics: `HubError`, `Error`.
pub fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::observability::tracer::NoopTracer;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<common::error::HubError>(), "HubError");
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name::<u32>(), "u32");
    }

    #[test]
    fn test_observe_safely_contains_panics() {
        let mut ran_after = false;
        observe_safely("test", || panic!("recorder exploded"));
        observe_safely("test", || ran_after = true);
        assert!(ran_after);
    }

    #[test]
    fn test_contain_returns_value_or_none() {
        assert_eq!(contain("test", || 7), Some(7));
        assert_eq!(contain("test", || -> u32 { panic!("backend down") }), None);
    }

    #[test]
    fn test_init_registers_full_catalog() {
        let telemetry = Telemetry::init("hub", Arc::new(NoopTracer)).unwrap();
        let snapshot = telemetry.registry.export_json().unwrap();

        for name in [
            "hub_http_requests_total",
            "hub_http_request_duration_seconds",
            "hub_http_request_size_bytes",
            "hub_http_response_size_bytes",
            "hub_http_errors_total",
            "hub_db_queries_total",
            "hub_db_query_duration_seconds",
            "hub_db_errors_total",
            "hub_auth_attempts_total",
            "hub_notifications_total",
            "hub_background_jobs_total",
            "hub_external_api_calls_total",
            "hub_active_users",
            "hub_active_sessions",
            "hub_realtime_connections",
            "hub_health_component_status",
            "hub_process_resident_memory_bytes",
            "hub_runtime_scheduler_lag_seconds",
        ] {
            assert!(snapshot.metric(name).is_some(), "{name} not registered");
        }
    }

    #[test]
    fn test_init_rejects_invalid_prefix() {
        assert!(Telemetry::init("bad-prefix", Arc::new(NoopTracer)).is_err());
    }
}
