//! HTTP routes for the monitoring surface.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::health::HealthAggregator;
use crate::middleware::{http_metrics_middleware, HttpInstrumentation};
use crate::observability::Telemetry;
use crate::storage::Storage;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Metric registry and families.
    pub telemetry: Telemetry,

    /// Instrumented storage backend.
    pub storage: Arc<dyn Storage>,

    /// Component health probes.
    pub health: Arc<HealthAggregator>,

    /// State for the HTTP metrics middleware.
    pub http: Arc<HttpInstrumentation>,
}

impl AppState {
    pub fn new(
        config: Config,
        telemetry: Telemetry,
        storage: Arc<dyn Storage>,
        health: Arc<HealthAggregator>,
    ) -> Self {
        let http = Arc::new(telemetry.http_instrumentation(config.slow_request_threshold));
        Self {
            config,
            telemetry,
            storage,
            health,
            http,
        }
    }
}

/// Monitoring endpoints without any layers.
///
/// - `/metrics` - Prometheus text exposition
/// - `/metrics/json` - structured metric snapshot
/// - `/health` - simple health check (storage ping)
/// - `/health/detailed` - every component
/// - `/health/ready` - readiness probe
/// - `/health/live` - liveness probe
/// - `/dashboard` - HTML summary
fn monitoring_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics_text))
        .route("/metrics/json", get(handlers::metrics_json))
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health))
        .route("/health/ready", get(handlers::readiness))
        .route("/health/live", get(handlers::liveness))
        .route("/dashboard", get(handlers::dashboard))
        .with_state(state)
}

/// Build the monitoring router with the global middleware layers applied.
pub fn build_routes(state: Arc<AppState>) -> Router {
    with_monitoring(Router::new(), state)
}

/// Merge the monitoring routes into `app` and apply the global layers.
///
/// Layer order (bottom-to-top execution):
/// 1. TraceLayer - Log request details (innermost)
/// 2. TimeoutLayer - Timeout the request
/// 3. http_metrics_middleware - Record ALL responses (outermost)
pub fn with_monitoring(app: Router, state: Arc<AppState>) -> Router {
    let instrumentation = Arc::clone(&state.http);
    app.merge(monitoring_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // Outermost so framework-level rejections (404, 405, 408) are counted too
        .layer(middleware::from_fn_with_state(
            instrumentation,
            http_metrics_middleware,
        ))
}
