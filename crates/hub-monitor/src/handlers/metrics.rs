//! Metric scrape handlers.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::instrument;

use crate::errors::MonitorError;
use crate::observability::exposition::MetricsSnapshot;
use crate::observability::registry::MetricRegistry;
use crate::routes::AppState;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render the registry as exposition text, containing any panic from the exporter.
pub(crate) fn render_text(registry: &MetricRegistry) -> Result<String, MonitorError> {
    catch_unwind(AssertUnwindSafe(|| registry.export_text()))
        .map_err(|_| MonitorError::Internal("metrics rendering panicked".to_string()))
}

/// Prometheus scrape endpoint.
#[instrument(skip_all, name = "hub.metrics.scrape")]
pub async fn metrics_text(State(state): State<Arc<AppState>>) -> Response {
    match render_text(&state.telemetry.registry) {
        Ok(body) => ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Structured snapshot of every metric family.
#[instrument(skip_all, name = "hub.metrics.json")]
pub async fn metrics_json(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetricsSnapshot>, MonitorError> {
    let snapshot = state.telemetry.registry.export_json()?;
    Ok(Json(snapshot))
}
