//! Tracing backend seam.
//!
//! Instrumentation opens a span per request or storage operation and reports
//! captured errors through `Tracer`. The default `TracingTracer` maps spans
//! onto `tracing` spans using the `otel.*` field conventions, so a subscriber
//! layer can forward them to any collector.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{field, Span};

use super::contain;

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

/// A span that has been started and not yet finished.
pub trait ActiveSpan: Send {
    fn set_attribute(&mut self, key: &'static str, value: String);

    /// `tracing` span to enter while the traced work runs.
    fn tracing_span(&self) -> Span {
        Span::none()
    }

    fn finish(self: Box<Self>, status: SpanStatus);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: Vec<(&'static str, String)>)
        -> Box<dyn ActiveSpan>;

    /// Report an error to the backend with a short context string.
    fn capture_error(&self, message: &str, context: &str);
}

/// Tracer backed by the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

struct TracingSpan {
    span: Span,
    attributes: Vec<(&'static str, String)>,
    started: Instant,
}

impl Tracer for TracingTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(&'static str, String)>,
    ) -> Box<dyn ActiveSpan> {
        let span = tracing::info_span!(
            target: "hub.trace",
            "hub.span",
            otel.name = %name,
            otel.status_code = field::Empty,
            otel.status_message = field::Empty,
        );
        Box::new(TracingSpan {
            span,
            attributes,
            started: Instant::now(),
        })
    }

    fn capture_error(&self, message: &str, context: &str) {
        tracing::error!(
            target: "hub.trace",
            context = %context,
            error = %message,
            "Captured error"
        );
    }
}

impl ActiveSpan for TracingSpan {
    fn set_attribute(&mut self, key: &'static str, value: String) {
        self.attributes.push((key, value));
    }

    fn tracing_span(&self) -> Span {
        self.span.clone()
    }

    fn finish(self: Box<Self>, status: SpanStatus) {
        match &status {
            SpanStatus::Ok => {
                self.span.record("otel.status_code", "OK");
            }
            SpanStatus::Error(message) => {
                self.span.record("otel.status_code", "ERROR");
                self.span.record("otel.status_message", message.as_str());
            }
        }
        let _entered = self.span.enter();
        tracing::debug!(
            target: "hub.trace",
            elapsed_ms = self.started.elapsed().as_millis(),
            attributes = ?self.attributes,
            "Span finished"
        );
    }
}

/// Tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl ActiveSpan for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: String) {}

    fn finish(self: Box<Self>, _status: SpanStatus) {}
}

impl Tracer for NoopTracer {
    fn start_span(
        &self,
        _name: &str,
        _attributes: Vec<(&'static str, String)>,
    ) -> Box<dyn ActiveSpan> {
        Box::new(NoopSpan)
    }

    fn capture_error(&self, _message: &str, _context: &str) {}
}

/// Shared handle type used across the crate.
pub type SharedTracer = Arc<dyn Tracer>;

/// Span whose backend calls are all panic-contained.
///
/// If the backend panics while starting the span, a `NoopSpan` stands in so
/// the traced work still runs. A panic in any later call is logged and the
/// traced result is unaffected.
pub struct GuardedSpan {
    inner: Box<dyn ActiveSpan>,
}

impl GuardedSpan {
    pub fn start(tracer: &dyn Tracer, name: &str, attributes: Vec<(&'static str, String)>) -> Self {
        let inner = contain("span.start", || tracer.start_span(name, attributes))
            .unwrap_or_else(|| Box::new(NoopSpan));
        Self { inner }
    }

    pub fn set_attribute(&mut self, key: &'static str, value: String) {
        let inner = &mut self.inner;
        let _ = contain("span.attribute", || inner.set_attribute(key, value));
    }

    pub fn tracing_span(&self) -> Span {
        contain("span.enter", || self.inner.tracing_span()).unwrap_or_else(Span::none)
    }

    pub fn finish(self, status: SpanStatus) {
        let inner = self.inner;
        let _ = contain("span.finish", move || inner.finish(status));
    }
}

/// `Tracer::capture_error` with any backend panic contained.
pub fn capture_error_safely(tracer: &dyn Tracer, message: &str, context: &str) {
    let _ = contain("capture_error", || tracer.capture_error(message, context));
}

/// Recording tracer for tests.
pub mod mock {
    use super::{ActiveSpan, Arc, Mutex, PoisonError, SpanStatus, Tracer};

    /// A span as it was finished.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FinishedSpan {
        pub name: String,
        pub attributes: Vec<(&'static str, String)>,
        pub status: SpanStatus,
    }

    /// Keeps every finished span and captured error in memory.
    #[derive(Debug, Default)]
    pub struct RecordingTracer {
        spans: Arc<Mutex<Vec<FinishedSpan>>>,
        errors: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTracer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn finished_spans(&self) -> Vec<FinishedSpan> {
            self.spans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Captured `(message, context)` pairs.
        pub fn captured_errors(&self) -> Vec<(String, String)> {
            self.errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    struct RecordingSpan {
        name: String,
        attributes: Vec<(&'static str, String)>,
        sink: Arc<Mutex<Vec<FinishedSpan>>>,
    }

    impl ActiveSpan for RecordingSpan {
        fn set_attribute(&mut self, key: &'static str, value: String) {
            self.attributes.push((key, value));
        }

        fn finish(self: Box<Self>, status: SpanStatus) {
            let RecordingSpan {
                name,
                attributes,
                sink,
            } = *self;
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(FinishedSpan {
                    name,
                    attributes,
                    status,
                });
        }
    }

    impl Tracer for RecordingTracer {
        fn start_span(
            &self,
            name: &str,
            attributes: Vec<(&'static str, String)>,
        ) -> Box<dyn ActiveSpan> {
            Box::new(RecordingSpan {
                name: name.to_string(),
                attributes,
                sink: Arc::clone(&self.spans),
            })
        }

        fn capture_error(&self, message: &str, context: &str) {
            self.errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((message.to_string(), context.to_string()));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::failing::{FailAt, FailingTracer};
    use super::mock::RecordingTracer;
    use super::*;

    #[test]
    fn test_recording_tracer_keeps_finished_spans() {
        let tracer = RecordingTracer::new();
        let mut span = tracer.start_span("GET /orgs/:id", vec![("http.method", "GET".into())]);
        span.set_attribute("http.status_code", "200".into());
        span.finish(SpanStatus::Ok);

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans.first().map(|s| s.name.as_str()), Some("GET /orgs/:id"));
        assert_eq!(
            spans.first().map(|s| s.attributes.clone()),
            Some(vec![
                ("http.method", "GET".to_string()),
                ("http.status_code", "200".to_string())
            ])
        );
    }

    #[test]
    fn test_unfinished_span_is_not_recorded() {
        let tracer = RecordingTracer::new();
        drop(tracer.start_span("abandoned", Vec::new()));
        assert!(tracer.finished_spans().is_empty());
    }

    #[test]
    fn test_tracing_and_noop_tracers_accept_full_lifecycle() {
        for tracer in [&TracingTracer as &dyn Tracer, &NoopTracer] {
            let mut span = tracer.start_span("op", Vec::new());
            span.set_attribute("k", "v".into());
            let _ = span.tracing_span();
            span.finish(SpanStatus::Error("boom".into()));
            tracer.capture_error("boom", "op");
        }
    }

    #[test]
    fn test_guarded_span_contains_backend_panics() {
        for step in [
            FailAt::Start,
            FailAt::Attribute,
            FailAt::Finish,
            FailAt::CaptureError,
        ] {
            let tracer = FailingTracer(step);
            let mut span = GuardedSpan::start(&tracer, "op", Vec::new());
            span.set_attribute("k", "v".into());
            let _ = span.tracing_span();
            span.finish(SpanStatus::Ok);
            capture_error_safely(&tracer, "boom", "op");
        }
    }

    #[test]
    fn test_guarded_span_forwards_to_backend() {
        let tracer = RecordingTracer::new();
        let mut span = GuardedSpan::start(&tracer, "op", vec![("a", "1".into())]);
        span.set_attribute("b", "2".into());
        span.finish(SpanStatus::Ok);

        let spans = tracer.finished_spans();
        assert_eq!(
            spans.first().map(|s| s.attributes.clone()),
            Some(vec![("a", "1".to_string()), ("b", "2".to_string())])
        );
    }
}
