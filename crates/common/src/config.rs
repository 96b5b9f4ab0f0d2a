//! Logging configuration shared by Sandwich Hub binaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, one event per line
    #[default]
    Pretty,
    /// Newline-delimited JSON for log shippers
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl ObservabilityConfig {
    /// Read `LOG_FORMAT` from a variable map; unknown values fall back to pretty.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let log_format = match vars.get("LOG_FORMAT").map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            default_filter: default_filter.to_string(),
            log_format,
        }
    }
}
