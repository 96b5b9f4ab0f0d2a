//! HTTP metrics middleware for capturing request/response metrics
//!
//! Applied as the outermost layer so it also sees framework-level responses
//! produced before a handler runs (404, 405, 415, timeouts).
//!
//! Each request that is not a health probe or metric scrape produces:
//! - one increment of the request counter
//! - one observation each for duration, request size and response size
//! - one error counter increment for 4xx/5xx responses
//! - one finished tracing span named `"<METHOD> <route>"`
//!
//! Recording happens when the response body has been fully produced, so
//! streamed bodies are measured by the bytes actually sent and the duration
//! includes body transmission. The route label is normalized so ids never
//! reach the label set.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};
use http_body::{Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{warn, Instrument};

use crate::observability::observe_safely;
use crate::observability::registry::{
    CounterHandle, HistogramHandle, MetricRegistry, RegistryError,
};
use crate::observability::route;
use crate::observability::tracer::{GuardedSpan, SharedTracer, SpanStatus};

/// Default slow request threshold.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const SIZE_BUCKETS: &[f64] = &[
    100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0,
];

const REQUEST_LABELS: &[&str] = &["method", "route", "status_code"];

/// HTTP metric families.
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub requests: CounterHandle,
    pub duration: HistogramHandle,
    pub request_size: HistogramHandle,
    pub response_size: HistogramHandle,
    pub errors: CounterHandle,
}

impl HttpMetrics {
    /// # Errors
    ///
    /// Returns `RegistryError` if any family conflicts with an existing one.
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            requests: registry.register_counter(
                &format!("{prefix}_http_requests_total"),
                "HTTP requests by method, route and status code",
                REQUEST_LABELS,
            )?,
            duration: registry.register_histogram(
                &format!("{prefix}_http_request_duration_seconds"),
                "HTTP request duration in seconds",
                REQUEST_LABELS,
                DURATION_BUCKETS,
            )?,
            request_size: registry.register_histogram(
                &format!("{prefix}_http_request_size_bytes"),
                "Approximate HTTP request size in bytes",
                REQUEST_LABELS,
                SIZE_BUCKETS,
            )?,
            response_size: registry.register_histogram(
                &format!("{prefix}_http_response_size_bytes"),
                "HTTP response body size in bytes",
                REQUEST_LABELS,
                SIZE_BUCKETS,
            )?,
            errors: registry.register_counter(
                &format!("{prefix}_http_errors_total"),
                "HTTP 4xx/5xx responses by method, route and error class",
                &["method", "route", "error_type"],
            )?,
        })
    }
}

/// Everything recorded about one completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRequest<'a> {
    pub method: &'a str,
    pub route: &'a str,
    pub status_code: u16,
    pub elapsed: Duration,
    pub request_bytes: u64,
    pub response_bytes: u64,
}

/// Error class label for a status code, `None` below 400.
pub fn error_class(status_code: u16) -> Option<&'static str> {
    match status_code {
        400..=499 => Some("client_error"),
        500.. => Some("server_error"),
        _ => None,
    }
}

/// State for `http_metrics_middleware`.
#[derive(Clone)]
pub struct HttpInstrumentation {
    metrics: HttpMetrics,
    tracer: SharedTracer,
    slow_threshold: Duration,
}

impl HttpInstrumentation {
    pub fn new(metrics: HttpMetrics, tracer: SharedTracer, slow_threshold: Duration) -> Self {
        Self {
            metrics,
            tracer,
            slow_threshold,
        }
    }

    /// Record metrics for one completed request.
    pub fn record(&self, completed: &CompletedRequest<'_>) {
        observe_safely("http", || {
            let status_code = completed.status_code.to_string();
            let labels = [
                ("method", completed.method),
                ("route", completed.route),
                ("status_code", status_code.as_str()),
            ];

            self.metrics.requests.increment(&labels, 1);
            self.metrics
                .duration
                .observe_duration(&labels, completed.elapsed);
            #[allow(clippy::cast_precision_loss)]
            {
                self.metrics
                    .request_size
                    .observe(&labels, completed.request_bytes as f64);
                self.metrics
                    .response_size
                    .observe(&labels, completed.response_bytes as f64);
            }

            if let Some(class) = error_class(completed.status_code) {
                self.metrics.errors.increment(
                    &[
                        ("method", completed.method),
                        ("route", completed.route),
                        ("error_type", class),
                    ],
                    1,
                );
            }
        });

        if completed.elapsed > self.slow_threshold {
            warn!(
                target: "hub.http",
                method = completed.method,
                route = completed.route,
                status_code = completed.status_code,
                duration_ms = completed.elapsed.as_millis(),
                request_bytes = completed.request_bytes,
                response_bytes = completed.response_bytes,
                "Slow request"
            );
        }
    }

    fn finish_span(mut span: GuardedSpan, completed: &CompletedRequest<'_>, body_failed: bool) {
        span.set_attribute("http.status_code", completed.status_code.to_string());
        span.set_attribute("http.request_size", completed.request_bytes.to_string());
        span.set_attribute("http.response_size", completed.response_bytes.to_string());
        span.set_attribute("http.duration_ms", completed.elapsed.as_millis().to_string());
        let status = if body_failed {
            SpanStatus::Error("response body failed".to_string())
        } else {
            match error_class(completed.status_code) {
                Some(_) => SpanStatus::Error(format!("HTTP {}", completed.status_code)),
                None => SpanStatus::Ok,
            }
        };
        span.finish(status);
    }
}

/// Approximate request size: header bytes, declared body length and query string.
pub fn approximate_request_size(request: &Request) -> u64 {
    let headers: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum();
    let body = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let query = request.uri().query().map_or(0, str::len);

    u64::try_from(headers + query)
        .unwrap_or(u64::MAX)
        .saturating_add(body)
}

/// A request whose response body is still being sent.
struct InFlight {
    instrumentation: Arc<HttpInstrumentation>,
    method: String,
    route: String,
    status_code: u16,
    started: Instant,
    request_bytes: u64,
    span: GuardedSpan,
}

impl InFlight {
    fn complete(self, response_bytes: u64, body_failed: bool) {
        let completed = CompletedRequest {
            method: &self.method,
            route: &self.route,
            status_code: self.status_code,
            elapsed: self.started.elapsed(),
            request_bytes: self.request_bytes,
            response_bytes,
        };
        self.instrumentation.record(&completed);
        HttpInstrumentation::finish_span(self.span, &completed, body_failed);
    }
}

/// Response body that counts data bytes and completes the request record
/// once the body ends, fails or is dropped.
///
/// A body dropped before its end (client disconnect) is recorded with the
/// bytes produced so far.
pub struct MeteredBody {
    inner: Body,
    bytes: u64,
    in_flight: Option<InFlight>,
}

impl MeteredBody {
    fn complete(&mut self, body_failed: bool) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.complete(self.bytes, body_failed);
        }
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes = this
                        .bytes
                        .saturating_add(u64::try_from(data.len()).unwrap_or(u64::MAX));
                }
                if this.inner.is_end_stream() {
                    this.complete(false);
                }
            }
            Poll::Ready(Some(Err(_))) => this.complete(true),
            Poll::Ready(None) => this.complete(false),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.complete(false);
    }
}

/// Middleware that records HTTP metrics and a tracing span per request.
///
/// Health, metrics and favicon paths pass straight through.
pub async fn http_metrics_middleware(
    State(instrumentation): State<Arc<HttpInstrumentation>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if route::is_excluded(&path) {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().to_string();
    let route = route::normalize(&path);
    let request_bytes = approximate_request_size(&request);

    let span = GuardedSpan::start(
        instrumentation.tracer.as_ref(),
        &format!("{method} {route}"),
        vec![
            ("http.method", method.clone()),
            ("http.route", route.clone()),
            ("http.target", path),
        ],
    );

    let response = next.run(request).instrument(span.tracing_span()).await;

    let in_flight = InFlight {
        instrumentation,
        method,
        route,
        status_code: response.status().as_u16(),
        started,
        request_bytes,
        span,
    };
    let (parts, body) = response.into_parts();
    if body.is_end_stream() {
        in_flight.complete(0, false);
        return Response::from_parts(parts, body);
    }

    let metered = MeteredBody {
        inner: body,
        bytes: 0,
        in_flight: Some(in_flight),
    };
    Response::from_parts(parts, Body::new(metered))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::tracer::failing::{FailAt, FailingTracer};
    use crate::observability::tracer::mock::RecordingTracer;
    use axum::{
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn handler_200() -> &'static str {
        "OK"
    }

    async fn handler_500() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "Error")
    }

    async fn handler_stream() -> Body {
        let chunks = (0..200).map(|_| Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789")));
        Body::from_stream(futures::stream::iter(chunks))
    }

    struct Fixture {
        registry: MetricRegistry,
        tracer: Arc<RecordingTracer>,
        app: Router,
    }

    fn app_with(registry: &MetricRegistry, tracer: SharedTracer) -> Router {
        let metrics = HttpMetrics::register(registry, "hub").expect("register should succeed");
        let instrumentation = Arc::new(HttpInstrumentation::new(
            metrics,
            tracer,
            DEFAULT_SLOW_REQUEST_THRESHOLD,
        ));
        Router::new()
            .route("/success", get(handler_200))
            .route("/error", get(handler_500))
            .route("/orgs/:id", get(handler_200))
            .route("/stream", get(handler_stream))
            .route("/health", get(handler_200))
            .layer(middleware::from_fn_with_state(
                instrumentation,
                http_metrics_middleware,
            ))
    }

    fn fixture() -> Fixture {
        let registry = MetricRegistry::new();
        let tracer = Arc::new(RecordingTracer::new());
        let app = app_with(&registry, tracer.clone());
        Fixture {
            registry,
            tracer,
            app,
        }
    }

    async fn call(app: &Router, uri: &str) -> Response {
        let request = HttpRequest::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");
        app.clone()
            .oneshot(request)
            .await
            .expect("request should succeed")
    }

    /// Send a request and read the whole response body.
    async fn send(app: &Router, uri: &str) -> (StatusCode, Bytes) {
        let response = call(app, uri).await;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn test_middleware_records_success() {
        let f = fixture();
        assert_eq!(send(&f.app, "/success").await.0, StatusCode::OK);

        let snapshot = f.registry.export_json().expect("export should succeed");
        let labels = [("method", "GET"), ("route", "/success"), ("status_code", "200")];
        assert_eq!(snapshot.value("hub_http_requests_total", &labels), Some(1.0));
        assert_eq!(
            snapshot.value("hub_http_request_duration_seconds_count", &labels),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value("hub_http_response_size_bytes_sum", &labels),
            Some(2.0)
        );
        assert_eq!(snapshot.total("hub_http_errors_total"), 0.0);
    }

    #[tokio::test]
    async fn test_middleware_records_server_error() {
        let f = fixture();
        assert_eq!(
            send(&f.app, "/error").await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let snapshot = f.registry.export_json().expect("export should succeed");
        assert_eq!(
            snapshot.value(
                "hub_http_errors_total",
                &[("method", "GET"), ("route", "/error"), ("error_type", "server_error")]
            ),
            Some(1.0)
        );
        let spans = f.tracer.finished_spans();
        assert_eq!(
            spans.first().map(|s| s.status.clone()),
            Some(SpanStatus::Error("HTTP 500".to_string()))
        );
    }

    #[tokio::test]
    async fn test_middleware_records_framework_404() {
        let f = fixture();
        assert_eq!(send(&f.app, "/missing/42").await.0, StatusCode::NOT_FOUND);

        let snapshot = f.registry.export_json().expect("export should succeed");
        assert_eq!(
            snapshot.value(
                "hub_http_requests_total",
                &[("method", "GET"), ("route", "/missing/:id"), ("status_code", "404")]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                "hub_http_errors_total",
                &[("method", "GET"), ("route", "/missing/:id"), ("error_type", "client_error")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_route_label_is_normalized() {
        let f = fixture();
        send(&f.app, "/orgs/1").await;
        send(&f.app, "/orgs/2").await;

        let snapshot = f.registry.export_json().expect("export should succeed");
        assert_eq!(
            snapshot.value(
                "hub_http_requests_total",
                &[("method", "GET"), ("route", "/orgs/:id"), ("status_code", "200")]
            ),
            Some(2.0)
        );
        let spans = f.tracer.finished_spans();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.name == "GET /orgs/:id"));
    }

    #[tokio::test]
    async fn test_span_carries_sizes_and_duration() {
        let f = fixture();
        send(&f.app, "/orgs/1").await;

        let spans = f.tracer.finished_spans();
        let span = spans.first().expect("span should be finished");
        let attribute = |key: &str| {
            span.attributes
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(attribute("http.route").as_deref(), Some("/orgs/:id"));
        assert_eq!(attribute("http.status_code").as_deref(), Some("200"));
        assert_eq!(attribute("http.response_size").as_deref(), Some("2"));
        assert_eq!(attribute("http.request_size").as_deref(), Some("0"));
        let duration_ms = attribute("http.duration_ms").expect("duration attribute");
        assert!(duration_ms.parse::<u128>().is_ok(), "duration was {duration_ms}");
    }

    #[tokio::test]
    async fn test_streamed_body_is_measured_when_it_ends() {
        let f = fixture();
        let labels = [("method", "GET"), ("route", "/stream"), ("status_code", "200")];

        let response = call(&f.app, "/stream").await;
        let pending = f.registry.export_json().expect("export should succeed");
        assert_eq!(pending.value("hub_http_requests_total", &labels), None);

        let body = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        assert_eq!(body.len(), 2000);

        let snapshot = f.registry.export_json().expect("export should succeed");
        assert_eq!(snapshot.value("hub_http_requests_total", &labels), Some(1.0));
        assert_eq!(
            snapshot.value("hub_http_response_size_bytes_sum", &labels),
            Some(2000.0)
        );
        assert_eq!(
            snapshot.value("hub_http_request_duration_seconds_count", &labels),
            Some(1.0)
        );
        assert_eq!(f.tracer.finished_spans().len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_body_is_recorded_once() {
        let f = fixture();
        drop(call(&f.app, "/stream").await);

        let snapshot = f.registry.export_json().expect("export should succeed");
        let labels = [("method", "GET"), ("route", "/stream"), ("status_code", "200")];
        assert_eq!(snapshot.value("hub_http_requests_total", &labels), Some(1.0));
        assert_eq!(
            snapshot.value("hub_http_response_size_bytes_sum", &labels),
            Some(0.0)
        );
        assert_eq!(f.tracer.finished_spans().len(), 1);
    }

    #[tokio::test]
    async fn test_tracer_panics_do_not_fail_requests() {
        for step in [FailAt::Start, FailAt::Attribute, FailAt::Finish] {
            let registry = MetricRegistry::new();
            let app = app_with(&registry, Arc::new(FailingTracer(step)));

            let (status, body) = send(&app, "/success").await;
            assert_eq!(status, StatusCode::OK, "{step:?}");
            assert_eq!(body, Bytes::from_static(b"OK"), "{step:?}");

            let snapshot = registry.export_json().expect("export should succeed");
            assert_eq!(
                snapshot.value(
                    "hub_http_requests_total",
                    &[("method", "GET"), ("route", "/success"), ("status_code", "200")]
                ),
                Some(1.0),
                "{step:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_excluded_paths_are_not_recorded() {
        let f = fixture();
        assert_eq!(send(&f.app, "/health").await.0, StatusCode::OK);

        let snapshot = f.registry.export_json().expect("export should succeed");
        assert_eq!(snapshot.total("hub_http_requests_total"), 0.0);
        assert!(f.tracer.finished_spans().is_empty());
    }

    #[test]
    fn test_error_class() {
        assert_eq!(error_class(200), None);
        assert_eq!(error_class(302), None);
        assert_eq!(error_class(400), Some("client_error"));
        assert_eq!(error_class(499), Some("client_error"));
        assert_eq!(error_class(500), Some("server_error"));
        assert_eq!(error_class(503), Some("server_error"));
    }

    #[test]
    fn test_approximate_request_size_counts_headers_body_and_query() {
        let request = HttpRequest::builder()
            .uri("/search?q=ham")
            .header("x-a", "12")
            .header(CONTENT_LENGTH, "10")
            .body(Body::empty())
            .expect("request builder should succeed");

        // "x-a"+"12" = 5, "content-length"+"10" = 16, "q=ham" = 5, body 10
        assert_eq!(approximate_request_size(&request), 36);
    }
}
