//! Process-wide metric registry.
//!
//! One `MetricRegistry` is constructed at startup and handed to every
//! component that records metrics. Samples are stored in a
//! `metrics_exporter_prometheus::PrometheusRecorder` that is deliberately
//! NOT installed as the global `metrics` recorder, so tests can build as
//! many isolated registries as they like.
//!
//! # Label discipline
//!
//! Every metric family declares its label names at registration. An
//! observation whose labels do not match the declared set exactly is
//! dropped and logged; it never panics and never returns an error to the
//! caller.
//!
//! # Histograms
//!
//! Bucket boundaries are fixed per family. The Prometheus recorder only
//! accepts bucket configuration at build time, so registering a histogram
//! rebuilds the recorder. Registration belongs at process start, before
//! samples are recorded.

use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::exposition::{self, MetricsSnapshot};

/// Instrument type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Histogram,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
            MetricKind::Gauge => "gauge",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Invalid metric or label name: '{0}'")]
    InvalidName(String),

    #[error("Metric '{name}' is already registered with a different kind, labels or buckets")]
    Conflict { name: String },

    #[error("Invalid buckets for '{name}': {reason}")]
    InvalidBuckets { name: String, reason: String },

    #[error("Histogram '{name}' registered after samples were recorded")]
    LateHistogram { name: String },

    #[error("Exporter error: {0}")]
    Exporter(String),

    #[error("Malformed exposition line: {0}")]
    Exposition(String),
}

/// Declared shape of one metric family.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MetricFamily {
    pub(crate) name: String,
    pub(crate) help: String,
    pub(crate) kind: MetricKind,
    pub(crate) label_names: Vec<String>,
    pub(crate) buckets: Vec<f64>,
}

impl MetricFamily {
    fn same_shape(&self, other: &MetricFamily) -> bool {
        self.kind == other.kind
            && self.label_names == other.label_names
            && self.buckets == other.buckets
    }

    /// Build the recorder key, ordering labels as declared.
    ///
    /// Returns `None` (and logs) when the supplied labels do not match the
    /// declared label names exactly.
    fn key(&self, labels: &[(&str, &str)]) -> Option<Key> {
        if labels.len() != self.label_names.len() {
            warn!(
                target: "hub.metrics",
                metric = %self.name,
                expected = ?self.label_names,
                supplied = labels.len(),
                "Label count mismatch, sample dropped"
            );
            return None;
        }

        let mut ordered = Vec::with_capacity(self.label_names.len());
        for declared in &self.label_names {
            let mut matches = labels.iter().filter(|pair| pair.0 == declared.as_str());
            match (matches.next(), matches.next()) {
                (Some(pair), None) => {
                    ordered.push(Label::new(declared.clone(), pair.1.to_string()));
                }
                _ => {
                    warn!(
                        target: "hub.metrics",
                        metric = %self.name,
                        label = %declared,
                        "Declared label missing or duplicated, sample dropped"
                    );
                    return None;
                }
            }
        }

        Some(Key::from_parts(self.name.clone(), ordered))
    }

    fn describe(&self, recorder: &PrometheusRecorder) {
        let key = KeyName::from(self.name.clone());
        let help = SharedString::from(self.help.clone());
        match self.kind {
            MetricKind::Counter => recorder.describe_counter(key, None, help),
            MetricKind::Histogram => recorder.describe_histogram(key, None, help),
            MetricKind::Gauge => recorder.describe_gauge(key, None, help),
        }
    }
}

struct Exporter {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl Exporter {
    fn build(families: &BTreeMap<String, Arc<MetricFamily>>) -> Result<Self, RegistryError> {
        let mut builder = PrometheusBuilder::new();
        for family in families
            .values()
            .filter(|f| f.kind == MetricKind::Histogram)
        {
            builder = builder
                .set_buckets_for_metric(Matcher::Full(family.name.clone()), &family.buckets)
                .map_err(|e| {
                    RegistryError::Exporter(format!(
                        "Failed to set buckets for {}: {e}",
                        family.name
                    ))
                })?;
        }

        let recorder = builder.build_recorder();
        for family in families.values() {
            family.describe(&recorder);
        }
        let handle = recorder.handle();

        Ok(Self { recorder, handle })
    }
}

struct Inner {
    families: RwLock<BTreeMap<String, Arc<MetricFamily>>>,
    exporter: RwLock<Exporter>,
}

/// Central store of all metric instruments.
///
/// Cheap to clone; clones share the same samples.
#[derive(Clone)]
pub struct MetricRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let families = self
            .inner
            .families
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MetricRegistry")
            .field("families", &families.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            inner: Arc::new(Inner {
                families: RwLock::new(BTreeMap::new()),
                exporter: RwLock::new(Exporter { recorder, handle }),
            }),
        }
    }

    /// Register a counter family.
    ///
    /// Registering the same name again with the same labels returns a handle
    /// to the existing family.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if a name is invalid or the name is already
    /// taken by a family with a different shape.
    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<CounterHandle, RegistryError> {
        let family = self.register(name, help, MetricKind::Counter, label_names, &[])?;
        Ok(CounterHandle {
            registry: self.clone(),
            family,
        })
    }

    /// Register a histogram family with explicit, strictly ascending buckets.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` for invalid names, invalid buckets, or a
    /// conflicting prior registration.
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: &[f64],
    ) -> Result<HistogramHandle, RegistryError> {
        validate_buckets(name, buckets)?;
        let family = self.register(name, help, MetricKind::Histogram, label_names, buckets)?;
        Ok(HistogramHandle {
            registry: self.clone(),
            family,
        })
    }

    /// Register a gauge family.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` for invalid names or a conflicting prior
    /// registration.
    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeHandle, RegistryError> {
        let family = self.register(name, help, MetricKind::Gauge, label_names, &[])?;
        Ok(GaugeHandle {
            registry: self.clone(),
            family,
        })
    }

    fn register(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
        buckets: &[f64],
    ) -> Result<Arc<MetricFamily>, RegistryError> {
        validate_name(name)?;
        for label in label_names {
            validate_name(label)?;
            if *label == "le" || *label == "quantile" {
                return Err(RegistryError::InvalidName((*label).to_string()));
            }
        }

        let candidate = MetricFamily {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
            buckets: buckets.to_vec(),
        };

        let mut families = self
            .inner
            .families
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = families.get(name) {
            if existing.same_shape(&candidate) {
                return Ok(Arc::clone(existing));
            }
            return Err(RegistryError::Conflict {
                name: name.to_string(),
            });
        }

        // Histogram buckets are fixed when the exporter is built, and
        // rebuilding it would discard every sample recorded so far.
        if kind == MetricKind::Histogram && self.has_samples() {
            return Err(RegistryError::LateHistogram {
                name: name.to_string(),
            });
        }

        let family = Arc::new(candidate);
        families.insert(name.to_string(), Arc::clone(&family));

        if kind == MetricKind::Histogram {
            match Exporter::build(&families) {
                Ok(exporter) => {
                    *self
                        .inner
                        .exporter
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = exporter;
                }
                Err(e) => {
                    families.remove(name);
                    return Err(e);
                }
            }
        } else {
            self.with_recorder(|recorder| family.describe(recorder));
        }

        Ok(family)
    }

    fn with_recorder<F: FnOnce(&PrometheusRecorder)>(&self, f: F) {
        let exporter = self
            .inner
            .exporter
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&exporter.recorder);
    }

    fn has_samples(&self) -> bool {
        !self.export_text().trim().is_empty()
    }

    /// Render every observed series in the Prometheus text exposition format.
    pub fn export_text(&self) -> String {
        self.inner
            .exporter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handle
            .render()
    }

    /// Structured snapshot of every registered family and its samples.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Exposition` if the rendered text cannot be parsed.
    pub fn export_json(&self) -> Result<MetricsSnapshot, RegistryError> {
        let text = self.export_text();
        let families: Vec<Arc<MetricFamily>> = self
            .inner
            .families
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        exposition::parse(&text, &families)
    }

    /// Discard all accumulated samples, keeping registered families.
    ///
    /// Test isolation only.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Exporter` if the exporter cannot be rebuilt.
    pub fn reset(&self) -> Result<(), RegistryError> {
        let families = self
            .inner
            .families
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let exporter = Exporter::build(&families)?;
        *self
            .inner
            .exporter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = exporter;
        Ok(())
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Prometheus metric and label names: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub(crate) fn validate_name(name: &str) -> Result<(), RegistryError> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_first && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidBuckets {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if buckets.is_empty() {
        return Err(invalid("at least one bucket is required"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("buckets must be finite"));
    }
    if buckets.windows(2).any(|w| matches!(w, [a, b] if a >= b)) {
        return Err(invalid("buckets must be strictly ascending"));
    }
    Ok(())
}

/// Handle to a registered counter family.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    registry: MetricRegistry,
    family: Arc<MetricFamily>,
}

impl CounterHandle {
    /// Add `amount` to the series identified by `labels`.
    pub fn increment(&self, labels: &[(&str, &str)], amount: u64) {
        if let Some(key) = self.family.key(labels) {
            self.registry.with_recorder(|recorder| {
                recorder.register_counter(&key, &metadata()).increment(amount);
            });
        }
    }
}

/// Handle to a registered histogram family.
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    registry: MetricRegistry,
    family: Arc<MetricFamily>,
}

impl HistogramHandle {
    pub fn observe(&self, labels: &[(&str, &str)], value: f64) {
        if let Some(key) = self.family.key(labels) {
            self.registry.with_recorder(|recorder| {
                recorder.register_histogram(&key, &metadata()).record(value);
            });
        }
    }

    /// Observe a duration in seconds.
    pub fn observe_duration(&self, labels: &[(&str, &str)], duration: Duration) {
        self.observe(labels, duration.as_secs_f64());
    }
}

/// Handle to a registered gauge family.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    registry: MetricRegistry,
    family: Arc<MetricFamily>,
}

impl GaugeHandle {
    pub fn set(&self, labels: &[(&str, &str)], value: f64) {
        if let Some(key) = self.family.key(labels) {
            self.registry.with_recorder(|recorder| {
                recorder.register_gauge(&key, &metadata()).set(value);
            });
        }
    }

    pub fn increment(&self, labels: &[(&str, &str)], amount: f64) {
        if let Some(key) = self.family.key(labels) {
            self.registry.with_recorder(|recorder| {
                recorder.register_gauge(&key, &metadata()).increment(amount);
            });
        }
    }

    pub fn decrement(&self, labels: &[(&str, &str)], amount: f64) {
        if let Some(key) = self.family.key(labels) {
            self.registry.with_recorder(|recorder| {
                recorder.register_gauge(&key, &metadata()).decrement(amount);
            });
        }
    }
}
