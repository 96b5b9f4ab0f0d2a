//! Parser from the Prometheus text exposition format to a JSON snapshot.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::registry::{MetricFamily, MetricKind, RegistryError};

const HISTOGRAM_SUFFIXES: [&str; 3] = ["_bucket", "_sum", "_count"];

/// One exposition sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    fn has_labels(&self, labels: &[(&str, &str)]) -> bool {
        self.labels.len() == labels.len()
            && labels
                .iter()
                .all(|(k, v)| self.labels.get(*k).map(String::as_str) == Some(*v))
    }
}

/// All samples of one registered family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    pub samples: Vec<Sample>,
}

/// Structured export of the whole registry, served on `/metrics/json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub metrics: Vec<MetricSnapshot>,
}

impl MetricsSnapshot {
    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    fn samples<'a>(&'a self, sample_name: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.metrics
            .iter()
            .flat_map(|m| m.samples.iter())
            .filter(move |s| s.name == sample_name)
    }

    /// Value of the sample with exactly these labels.
    pub fn value(&self, sample_name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.samples(sample_name)
            .find(|s| s.has_labels(labels))
            .map(|s| s.value)
    }

    /// Sum over every series with this sample name.
    pub fn total(&self, sample_name: &str) -> f64 {
        self.samples(sample_name).map(|s| s.value).sum()
    }

    /// Sum over every series of `sample_name` whose labels include `filter`.
    pub fn total_where(&self, sample_name: &str, filter: &[(&str, &str)]) -> f64 {
        self.samples(sample_name)
            .filter(|s| {
                filter
                    .iter()
                    .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|s| s.value)
            .sum()
    }

    /// Cumulative `(le, count)` pairs of one histogram series, in bucket order.
    pub fn buckets(&self, histogram: &str, labels: &[(&str, &str)]) -> Vec<(f64, f64)> {
        let bucket_name = format!("{histogram}_bucket");
        let mut buckets: Vec<(f64, f64)> = self
            .samples(&bucket_name)
            .filter(|s| {
                s.labels.len() == labels.len() + 1
                    && labels
                        .iter()
                        .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .filter_map(|s| {
                s.labels
                    .get("le")
                    .and_then(|le| parse_value(le).ok())
                    .map(|le| (le, s.value))
            })
            .collect();
        buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
        buckets
    }
}

/// Parse rendered exposition text, grouping samples under registered families.
///
/// Every registered family appears in the output, even without samples.
/// Sample lines for names the registry does not know are skipped.
pub(crate) fn parse(
    text: &str,
    families: &[Arc<MetricFamily>],
) -> Result<MetricsSnapshot, RegistryError> {
    let mut grouped: BTreeMap<&str, Vec<Sample>> = families
        .iter()
        .map(|f| (f.name.as_str(), Vec::new()))
        .collect();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let sample = parse_sample(line)?;
        let family = family_of(&sample.name, &grouped);
        match family.and_then(|name| grouped.get_mut(name)) {
            Some(samples) => samples.push(sample),
            None => {
                debug!(
                    target: "hub.metrics",
                    sample = %sample.name,
                    "Skipping unregistered sample"
                );
            }
        }
    }

    let metrics = families
        .iter()
        .map(|family| MetricSnapshot {
            name: family.name.clone(),
            kind: family.kind,
            help: family.help.clone(),
            samples: grouped.remove(family.name.as_str()).unwrap_or_default(),
        })
        .collect();

    Ok(MetricsSnapshot { metrics })
}

fn family_of<'a>(sample_name: &str, grouped: &BTreeMap<&'a str, Vec<Sample>>) -> Option<&'a str> {
    if let Some((name, _)) = grouped.get_key_value(sample_name) {
        return Some(*name);
    }
    HISTOGRAM_SUFFIXES
        .iter()
        .filter_map(|suffix| sample_name.strip_suffix(suffix))
        .find_map(|base| grouped.get_key_value(base).map(|(name, _)| *name))
}

fn parse_sample(line: &str) -> Result<Sample, RegistryError> {
    let malformed = || RegistryError::Exposition(line.to_string());

    let split = line.find(['{', ' ']).ok_or_else(malformed)?;
    let (name, rest) = line.split_at(split);

    let (labels, value_part) = match rest.strip_prefix('{') {
        Some(after_brace) => parse_labels(after_brace).ok_or_else(malformed)?,
        None => (BTreeMap::new(), rest),
    };

    // Value may be followed by an optional timestamp
    let value = value_part
        .split_whitespace()
        .next()
        .ok_or_else(malformed)
        .and_then(|v| parse_value(v).map_err(|_| malformed()))?;

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse `k="v",...}` and return the labels plus the text after the closing brace.
fn parse_labels(input: &str) -> Option<(BTreeMap<String, String>, &str)> {
    let mut labels = BTreeMap::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| *c == ',' || *c == ' ').is_some() {}

        let first = match chars.next()? {
            (i, '}') => return Some((labels, input.get(i + 1..).unwrap_or_default())),
            (_, c) => c,
        };

        let mut key = String::from(first);
        loop {
            match chars.next()? {
                (_, '=') => break,
                (_, c) => key.push(c),
            }
        }

        if chars.next()?.1 != '"' {
            return None;
        }

        let mut value = String::new();
        loop {
            match chars.next()? {
                (_, '\\') => match chars.next()? {
                    (_, 'n') => value.push('\n'),
                    (_, c) => value.push(c),
                },
                (_, '"') => break,
                (_, c) => value.push(c),
            }
        }

        labels.insert(key, value);
    }
}

fn parse_value(raw: &str) -> Result<f64, std::num::ParseFloatError> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse(),
    }
}
