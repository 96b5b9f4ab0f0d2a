//! Timing, counting and tracing of storage operations.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{warn, Instrument};

use crate::observability::registry::{
    CounterHandle, HistogramHandle, MetricRegistry, RegistryError,
};
use crate::observability::tracer::{
    capture_error_safely, GuardedSpan, SharedTracer, SpanStatus,
};
use crate::observability::{observe_safely, short_type_name};

/// Default slow operation threshold.
pub const DEFAULT_SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(500);

const QUERY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Kind of storage operation, used as the `operation` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Unknown,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Select => "SELECT",
            OperationKind::Insert => "INSERT",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage operation metric families.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub operations: CounterHandle,
    pub duration: HistogramHandle,
    pub errors: CounterHandle,
}

impl OperationMetrics {
    /// # Errors
    ///
    /// Returns `RegistryError` if any family conflicts with an existing one.
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            operations: registry.register_counter(
                &format!("{prefix}_db_queries_total"),
                "Storage operations by kind, resource and success",
                &["operation", "resource", "success"],
            )?,
            duration: registry.register_histogram(
                &format!("{prefix}_db_query_duration_seconds"),
                "Storage operation duration in seconds",
                &["operation", "resource", "success"],
                QUERY_BUCKETS,
            )?,
            errors: registry.register_counter(
                &format!("{prefix}_db_errors_total"),
                "Failed storage operations by kind, resource and error type",
                &["operation", "resource", "error_type"],
            )?,
        })
    }
}

/// In-flight operation state, created at start and consumed at finish.
struct OperationContext<'a> {
    kind: OperationKind,
    resource: &'a str,
    started: Instant,
    span: GuardedSpan,
}

enum Completion {
    Success,
    Failure {
        error_type: &'static str,
        message: String,
    },
}

impl Completion {
    fn of<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Completion::Success,
            Err(e) => Completion::Failure {
                error_type: short_type_name::<E>(),
                message: e.to_string(),
            },
        }
    }
}

/// Wraps storage calls with metrics, a span and slow-call logging.
///
/// Results pass through untouched: a failing operation is recorded and its
/// error is returned to the caller as-is.
#[derive(Clone)]
pub struct OperationInstrumentation {
    metrics: OperationMetrics,
    tracer: SharedTracer,
    slow_threshold: Duration,
}

impl OperationInstrumentation {
    pub fn new(metrics: OperationMetrics, tracer: SharedTracer, slow_threshold: Duration) -> Self {
        Self {
            metrics,
            tracer,
            slow_threshold,
        }
    }

    /// Instrument an async operation.
    pub async fn run_async<T, E, F, Fut>(
        &self,
        kind: OperationKind,
        resource: &str,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let context = self.begin(kind, resource);
        let span = context.span.tracing_span();
        let result = operation().instrument(span).await;
        self.finish(context, Completion::of(&result));
        result
    }

    /// Instrument a synchronous operation.
    pub fn run_sync<T, E, F>(
        &self,
        kind: OperationKind,
        resource: &str,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let context = self.begin(kind, resource);
        let result = {
            let _entered = context.span.tracing_span().entered();
            operation()
        };
        self.finish(context, Completion::of(&result));
        result
    }

    fn begin<'a>(&self, kind: OperationKind, resource: &'a str) -> OperationContext<'a> {
        let span = GuardedSpan::start(
            self.tracer.as_ref(),
            &format!("{kind} {resource}"),
            vec![
                ("db.operation", kind.as_str().to_string()),
                ("db.resource", resource.to_string()),
            ],
        );
        OperationContext {
            kind,
            resource,
            started: Instant::now(),
            span,
        }
    }

    fn finish(&self, context: OperationContext<'_>, completion: Completion) {
        let OperationContext {
            kind,
            resource,
            started,
            mut span,
        } = context;
        let elapsed = started.elapsed();
        let success = matches!(completion, Completion::Success);

        observe_safely("operation", || {
            let labels = [
                ("operation", kind.as_str()),
                ("resource", resource),
                ("success", if success { "true" } else { "false" }),
            ];
            self.metrics.operations.increment(&labels, 1);
            self.metrics.duration.observe_duration(&labels, elapsed);

            if let Completion::Failure { error_type, .. } = &completion {
                self.metrics.errors.increment(
                    &[
                        ("operation", kind.as_str()),
                        ("resource", resource),
                        ("error_type", *error_type),
                    ],
                    1,
                );
            }
        });

        if elapsed > self.slow_threshold {
            warn!(
                target: "hub.operation",
                operation = kind.as_str(),
                resource,
                duration_ms = elapsed.as_millis(),
                success,
                "Slow storage operation"
            );
        }

        span.set_attribute("db.duration_ms", elapsed.as_millis().to_string());
        match completion {
            Completion::Success => span.finish(SpanStatus::Ok),
            Completion::Failure {
                error_type,
                message,
            } => {
                span.set_attribute("error.type", error_type.to_string());
                capture_error_safely(
                    self.tracer.as_ref(),
                    &message,
                    &format!("{kind} {resource}"),
                );
                span.finish(SpanStatus::Error(message));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::tracer::failing::{FailAt, FailingTracer};
    use crate::observability::tracer::mock::RecordingTracer;
    use common::error::HubError;
    use std::sync::Arc;

    fn fixture() -> (MetricRegistry, Arc<RecordingTracer>, OperationInstrumentation) {
        let registry = MetricRegistry::new();
        let metrics = OperationMetrics::register(&registry, "hub").unwrap();
        let tracer = Arc::new(RecordingTracer::new());
        let instrumentation = OperationInstrumentation::new(
            metrics,
            tracer.clone(),
            DEFAULT_SLOW_OPERATION_THRESHOLD,
        );
        (registry, tracer, instrumentation)
    }

    #[tokio::test]
    async fn test_successful_operation_is_counted_once() {
        let (registry, tracer, ops) = fixture();

        let result: Result<Vec<u32>, HubError> = ops
            .run_async(OperationKind::Select, "sandwich_collections", || async {
                Ok(vec![1, 2, 3])
            })
            .await;
        assert_eq!(result, Ok(vec![1, 2, 3]));

        let snapshot = registry.export_json().unwrap();
        let labels = [
            ("operation", "SELECT"),
            ("resource", "sandwich_collections"),
            ("success", "true"),
        ];
        assert_eq!(snapshot.value("hub_db_queries_total", &labels), Some(1.0));
        assert_eq!(
            snapshot.value("hub_db_query_duration_seconds_count", &labels),
            Some(1.0)
        );
        assert_eq!(snapshot.total("hub_db_errors_total"), 0.0);

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans.first().map(|s| (s.name.as_str(), s.status.clone())),
            Some(("SELECT sandwich_collections", SpanStatus::Ok))
        );
    }

    #[tokio::test]
    async fn test_failed_operation_reraises_and_records_error() {
        let (registry, tracer, ops) = fixture();

        let result: Result<(), HubError> = ops
            .run_async(OperationKind::Insert, "sandwich_collections", || async {
                Err(HubError::Database("unique violation".into()))
            })
            .await;
        assert_eq!(
            result,
            Err(HubError::Database("unique violation".into()))
        );

        let snapshot = registry.export_json().unwrap();
        assert_eq!(
            snapshot.value(
                "hub_db_queries_total",
                &[
                    ("operation", "INSERT"),
                    ("resource", "sandwich_collections"),
                    ("success", "false")
                ]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                "hub_db_errors_total",
                &[
                    ("operation", "INSERT"),
                    ("resource", "sandwich_collections"),
                    ("error_type", "HubError")
                ]
            ),
            Some(1.0)
        );

        let errors = tracer.captured_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.first().map(|(_, context)| context.as_str()),
            Some("INSERT sandwich_collections")
        );
        assert!(matches!(
            tracer.finished_spans().first().map(|s| &s.status),
            Some(SpanStatus::Error(_))
        ));
    }

    #[test]
    fn test_sync_operation() {
        let (registry, _tracer, ops) = fixture();

        let result: Result<usize, HubError> =
            ops.run_sync(OperationKind::Select, "cache", || Ok(7));
        assert_eq!(result, Ok(7));

        let result: Result<usize, HubError> = ops.run_sync(OperationKind::Delete, "cache", || {
            Err(HubError::Database("entry missing".into()))
        });
        assert!(result.is_err());

        let snapshot = registry.export_json().unwrap();
        assert_eq!(
            snapshot.value(
                "hub_db_queries_total",
                &[("operation", "SELECT"), ("resource", "cache"), ("success", "true")]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                "hub_db_errors_total",
                &[("operation", "DELETE"), ("resource", "cache"), ("error_type", "HubError")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_duration_reflects_operation_latency() {
        let (registry, _tracer, ops) = fixture();

        let _: Result<(), HubError> = ops
            .run_async(OperationKind::Update, "hosts", || async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok(())
            })
            .await;

        let snapshot = registry.export_json().unwrap();
        let labels = [("operation", "UPDATE"), ("resource", "hosts"), ("success", "true")];
        let buckets = snapshot.buckets("hub_db_query_duration_seconds", &labels);
        assert!(!buckets.is_empty());
        for (le, count) in buckets {
            if le < 0.1 {
                assert_eq!(count, 0.0, "bucket le={le}");
            }
        }
    }

    #[tokio::test]
    async fn test_tracer_panics_do_not_replace_the_result() {
        for step in [
            FailAt::Start,
            FailAt::Attribute,
            FailAt::Finish,
            FailAt::CaptureError,
        ] {
            let registry = MetricRegistry::new();
            let ops = OperationInstrumentation::new(
                OperationMetrics::register(&registry, "hub").unwrap(),
                Arc::new(FailingTracer(step)),
                DEFAULT_SLOW_OPERATION_THRESHOLD,
            );

            let ok = tokio::spawn(async move {
                let ok: Result<u32, HubError> = ops
                    .run_async(OperationKind::Select, "sandwich_collections", || async { Ok(7) })
                    .await;
                let failed: Result<u32, HubError> =
                    ops.run_sync(OperationKind::Delete, "hosts", || {
                        Err(HubError::Timeout("lock wait".into()))
                    });
                (ok, failed)
            })
            .await;

            assert_eq!(
                ok.unwrap(),
                (Ok(7), Err(HubError::Timeout("lock wait".into()))),
                "{step:?}"
            );
            let snapshot = registry.export_json().unwrap();
            assert_eq!(snapshot.total("hub_db_queries_total"), 2.0, "{step:?}");
        }
    }

    #[test]
    fn test_operation_kind_labels() {
        assert_eq!(OperationKind::Select.to_string(), "SELECT");
        assert_eq!(OperationKind::Unknown.to_string(), "unknown");
    }
}
