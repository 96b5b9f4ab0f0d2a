//! Human-readable monitoring dashboard.
//!
//! A single self-contained HTML page summarizing the metric snapshot. Every
//! value interpolated into the page is HTML-escaped.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, instrument};

use crate::errors::MonitorError;
use crate::observability::exposition::MetricsSnapshot;
use crate::routes::AppState;

const MAX_ROUTE_ROWS: usize = 15;

/// Per-route request totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSummary {
    pub method: String,
    pub route: String,
    pub requests: f64,
    pub errors: f64,
}

/// Figures shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSummary {
    pub environment: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub total_requests: f64,
    pub error_requests: f64,
    pub avg_request_ms: Option<f64>,
    pub storage_operations: f64,
    pub storage_failures: f64,
    pub active_users: Vec<(String, f64)>,
    pub active_sessions: f64,
    pub realtime_connections: f64,
    pub resident_memory_bytes: Option<f64>,
    pub routes: Vec<RouteSummary>,
}

impl DashboardSummary {
    /// Summarize a snapshot whose metric names start with `prefix`.
    pub fn from_snapshot(snapshot: &MetricsSnapshot, prefix: &str) -> Self {
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let duration_sum = snapshot.total(&name("http_request_duration_seconds_sum"));
        let duration_count = snapshot.total(&name("http_request_duration_seconds_count"));
        let avg_request_ms = (duration_count > 0.0).then(|| duration_sum / duration_count * 1000.0);

        let active_users = snapshot
            .metric(&name("active_users"))
            .map(|metric| {
                metric
                    .samples
                    .iter()
                    .filter_map(|s| s.labels.get("window").map(|w| (w.clone(), s.value)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            total_requests: snapshot.total(&name("http_requests_total")),
            error_requests: snapshot.total(&name("http_errors_total")),
            avg_request_ms,
            storage_operations: snapshot.total(&name("db_queries_total")),
            storage_failures: snapshot
                .total_where(&name("db_queries_total"), &[("success", "false")]),
            active_users,
            active_sessions: snapshot.total(&name("active_sessions")),
            realtime_connections: snapshot.total(&name("realtime_connections")),
            resident_memory_bytes: snapshot.value(&name("process_resident_memory_bytes"), &[]),
            routes: route_summaries(snapshot, prefix),
            ..Self::default()
        }
    }
}

fn route_summaries(snapshot: &MetricsSnapshot, prefix: &str) -> Vec<RouteSummary> {
    let mut by_route: BTreeMap<(String, String), RouteSummary> = BTreeMap::new();
    let requests = format!("{prefix}_http_requests_total");

    for sample in snapshot
        .metric(&requests)
        .map(|m| m.samples.as_slice())
        .unwrap_or_default()
    {
        let (Some(method), Some(route)) = (sample.labels.get("method"), sample.labels.get("route"))
        else {
            continue;
        };
        let entry = by_route
            .entry((method.clone(), route.clone()))
            .or_insert_with(|| RouteSummary {
                method: method.clone(),
                route: route.clone(),
                ..RouteSummary::default()
            });
        entry.requests += sample.value;
        let is_error = sample
            .labels
            .get("status_code")
            .and_then(|code| code.parse::<u16>().ok())
            .is_some_and(|code| code >= 400);
        if is_error {
            entry.errors += sample.value;
        }
    }

    let mut routes: Vec<RouteSummary> = by_route.into_values().collect();
    routes.sort_by(|a, b| b.requests.total_cmp(&a.requests));
    routes.truncate(MAX_ROUTE_ROWS);
    routes
}

/// Escape text for inclusion in HTML element content or attributes.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn card(html: &mut String, title: &str, value: &str) {
    let _ = write!(
        html,
        r#"<div class="card"><h2>{}</h2><p>{}</p></div>"#,
        escape_html(title),
        escape_html(value)
    );
}

/// Render the dashboard page.
pub fn render(summary: &DashboardSummary) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(
        r#"<!DOCTYPE html><html lang="en"><head><meta charset="utf-8"><meta http-equiv="refresh" content="30"><title>Hub Monitoring</title><style>body{font-family:system-ui,sans-serif;margin:2rem;background:#f7f7f5;color:#222}.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(14rem,1fr));gap:1rem}.card{background:#fff;border-radius:8px;padding:1rem;box-shadow:0 1px 3px rgba(0,0,0,.1)}.card h2{font-size:.9rem;margin:0;color:#666}.card p{font-size:1.6rem;margin:.4rem 0 0}table{border-collapse:collapse;margin-top:2rem;background:#fff}td,th{padding:.4rem .8rem;border-bottom:1px solid #eee;text-align:left}</style></head><body>"#,
    );

    let _ = write!(
        html,
        "<h1>Hub Monitoring</h1><p>Environment: {} &middot; Version: {} &middot; Uptime: {}s</p>",
        escape_html(&summary.environment),
        escape_html(&summary.version),
        summary.uptime_seconds
    );

    html.push_str(r#"<div class="grid">"#);
    card(&mut html, "HTTP requests", &format!("{:.0}", summary.total_requests));
    card(&mut html, "HTTP errors", &format!("{:.0}", summary.error_requests));
    card(
        &mut html,
        "Average latency",
        &summary
            .avg_request_ms
            .map_or_else(|| "n/a".to_string(), |ms| format!("{ms:.1} ms")),
    );
    card(&mut html, "Storage operations", &format!("{:.0}", summary.storage_operations));
    card(&mut html, "Storage failures", &format!("{:.0}", summary.storage_failures));
    for (window, count) in &summary.active_users {
        card(&mut html, &format!("Active users ({window})"), &format!("{count:.0}"));
    }
    card(&mut html, "Active sessions", &format!("{:.0}", summary.active_sessions));
    card(&mut html, "Realtime connections", &format!("{:.0}", summary.realtime_connections));
    card(
        &mut html,
        "Resident memory",
        &summary
            .resident_memory_bytes
            .map_or_else(|| "n/a".to_string(), |b| format!("{:.1} MiB", b / 1_048_576.0)),
    );
    html.push_str("</div>");

    if !summary.routes.is_empty() {
        html.push_str(
            "<table><thead><tr><th>Method</th><th>Route</th><th>Requests</th><th>Errors</th></tr></thead><tbody>",
        );
        for route in &summary.routes {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{:.0}</td><td>{:.0}</td></tr>",
                escape_html(&route.method),
                escape_html(&route.route),
                route.requests,
                route.errors
            );
        }
        html.push_str("</tbody></table>");
    }

    html.push_str(
        r#"<p><a href="/metrics">Prometheus metrics</a> &middot; <a href="/metrics/json">JSON</a> &middot; <a href="/health/detailed">Detailed health</a></p></body></html>"#,
    );
    html
}

const ERROR_PAGE: &str = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>Hub Monitoring</title></head><body><h1>Dashboard unavailable</h1><p>Metrics could not be loaded. See the service logs.</p></body></html>";

fn build_page(state: &AppState) -> Result<String, MonitorError> {
    let snapshot = state.telemetry.registry.export_json()?;
    let summary = DashboardSummary {
        environment: state.config.environment.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.health.uptime().as_secs(),
        ..DashboardSummary::from_snapshot(&snapshot, &state.config.metrics_prefix)
    };
    Ok(render(&summary))
}

/// Monitoring dashboard. Falls back to a static error page on failure.
#[instrument(skip_all, name = "hub.dashboard")]
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Response {
    match build_page(&state) {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            error!(target: "hub.http", error = %e, "Dashboard rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
        }
    }
}
