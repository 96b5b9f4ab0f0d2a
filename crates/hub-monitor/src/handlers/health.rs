//! Health check handlers.
//!
//! Four tiers of probe:
//! - `/health` - storage round trip, for load balancers
//! - `/health/detailed` - every component, for operators
//! - `/health/ready` - storage round trip, for orchestrator readiness
//! - `/health/live` - process liveness only, never touches dependencies

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::health::{HealthCheckResult, HealthStatus};
use crate::routes::AppState;

/// Body of the simple probe endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeResponse {
    fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            message: None,
        }
    }

    fn failed(status: &str, message: &str) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.to_string()),
        }
    }
}

/// Simple health check.
///
/// 200 `{"status":"ok"}` when storage answers, otherwise
/// 503 `{"status":"error","message":...}`.
#[instrument(skip_all, name = "hub.health.simple")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ProbeResponse>) {
    match state.health.ping().await {
        Ok(()) => (StatusCode::OK, Json(ProbeResponse::status("ok"))),
        Err(e) => {
            warn!(target: "hub.health", error = %e, kind = e.kind(), "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ProbeResponse::failed("error", "Storage unavailable")),
            )
        }
    }
}

/// Detailed health check.
///
/// 503 only when the overall status is unhealthy; a degraded service still
/// answers 200 so it stays in rotation.
#[instrument(skip_all, name = "hub.health.detailed")]
pub async fn detailed_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthCheckResult>) {
    let result = state.health.check().await;
    state.telemetry.health.publish(&result);

    let status = if result.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(result))
}

/// Readiness probe.
#[instrument(skip_all, name = "hub.health.readiness")]
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ProbeResponse>) {
    match state.health.ping().await {
        Ok(()) => (StatusCode::OK, Json(ProbeResponse::status("ready"))),
        Err(e) => {
            warn!(target: "hub.health", error = %e, kind = e.kind(), "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ProbeResponse::failed("not_ready", "Storage unavailable")),
            )
        }
    }
}

/// Liveness probe. Always 200 while the process can serve requests.
#[instrument(skip_all, name = "hub.health.liveness")]
pub async fn liveness() -> Json<ProbeResponse> {
    Json(ProbeResponse::status("alive"))
}
