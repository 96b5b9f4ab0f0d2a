//! Hub monitor configuration.
//!
//! Configuration is loaded from environment variables. Credentials are held
//! as `SecretString` and the database URL is redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::{is_configured, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::health::{ExternalService, HealthSettings};
use crate::observability::registry::validate_name;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "hub=info,tower_http=info";

/// Default metric name prefix.
pub const DEFAULT_METRICS_PREFIX: &str = "hub";

pub const DEFAULT_SLOW_REQUEST_THRESHOLD_MS: u64 = 1000;
pub const DEFAULT_SLOW_OPERATION_THRESHOLD_MS: u64 = 500;
pub const DEFAULT_HEALTH_PROBE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_BUSINESS_METRICS_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_RUNTIME_METRICS_INTERVAL_SECONDS: u64 = 15;
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Deployment environment reported by health checks.
    pub environment: String,

    /// Prefix for every metric name (default: "hub").
    pub metrics_prefix: String,

    pub slow_request_threshold: Duration,
    pub slow_operation_threshold: Duration,

    /// Per-probe limit for health checks.
    pub health_probe_timeout: Duration,

    pub health_check_interval: Duration,
    pub business_metrics_interval: Duration,
    pub runtime_metrics_interval: Duration,

    /// Directory the disk probe writes its scratch file into.
    pub health_scratch_dir: PathBuf,

    /// Time allowed for in-flight requests after a shutdown signal.
    pub drain_period: Duration,

    /// Memory budget the memory probe measures against. When unset the
    /// cgroup limit is used, then host memory.
    pub memory_limit_bytes: Option<u64>,

    pub sendgrid_api_key: Option<SecretString>,
    pub google_service_account_key: Option<SecretString>,
    pub sentry_dsn: Option<SecretString>,

    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("environment", &self.environment)
            .field("metrics_prefix", &self.metrics_prefix)
            .field("slow_request_threshold", &self.slow_request_threshold)
            .field("slow_operation_threshold", &self.slow_operation_threshold)
            .field("health_probe_timeout", &self.health_probe_timeout)
            .field("health_check_interval", &self.health_check_interval)
            .field("business_metrics_interval", &self.business_metrics_interval)
            .field("runtime_metrics_interval", &self.runtime_metrics_interval)
            .field("health_scratch_dir", &self.health_scratch_dir)
            .field("drain_period", &self.drain_period)
            .field("memory_limit_bytes", &self.memory_limit_bytes)
            .field("sendgrid_api_key", &self.sendgrid_api_key)
            .field("google_service_account_key", &self.google_service_account_key)
            .field("sentry_dsn", &self.sentry_dsn)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid numeric configuration: {0}")]
    InvalidNumber(String),

    #[error("Invalid metrics prefix: {0}")]
    InvalidMetricsPrefix(String),
}

/// Parse a non-negative integer, falling back to `default` when unset.
fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    value_str.parse().map_err(|e| {
        ConfigError::InvalidNumber(format!(
            "{key} must be a valid non-negative integer, got '{value_str}': {e}"
        ))
    })
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_u64(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidNumber(format!(
            "{key} must be greater than 0"
        )));
    }

    Ok(value)
}

fn optional_secret(vars: &HashMap<String, String>, key: &str) -> Option<SecretString> {
    vars.get(key)
        .map(|value| SecretString::from(value.clone()))
        .filter(|secret| is_configured(Some(secret)))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let environment = vars
            .get("HUB_ENVIRONMENT")
            .cloned()
            .unwrap_or_else(|| "development".to_string());

        let metrics_prefix = vars
            .get("METRICS_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_METRICS_PREFIX.to_string());
        validate_name(&metrics_prefix).map_err(|_| {
            ConfigError::InvalidMetricsPrefix(format!(
                "METRICS_PREFIX must match [a-zA-Z_][a-zA-Z0-9_]*, got '{metrics_prefix}'"
            ))
        })?;

        let millis = |key: &str, default: u64| {
            parse_positive(vars, key, default).map(Duration::from_millis)
        };
        let seconds = |key: &str, default: u64| {
            parse_positive(vars, key, default).map(Duration::from_secs)
        };

        let health_scratch_dir = vars
            .get("HEALTH_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        Ok(Config {
            database_url,
            bind_address,
            environment,
            metrics_prefix,
            slow_request_threshold: millis(
                "SLOW_REQUEST_THRESHOLD_MS",
                DEFAULT_SLOW_REQUEST_THRESHOLD_MS,
            )?,
            slow_operation_threshold: millis(
                "SLOW_OPERATION_THRESHOLD_MS",
                DEFAULT_SLOW_OPERATION_THRESHOLD_MS,
            )?,
            health_probe_timeout: millis(
                "HEALTH_PROBE_TIMEOUT_MS",
                DEFAULT_HEALTH_PROBE_TIMEOUT_MS,
            )?,
            health_check_interval: seconds(
                "HEALTH_CHECK_INTERVAL_SECONDS",
                DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS,
            )?,
            business_metrics_interval: seconds(
                "BUSINESS_METRICS_INTERVAL_SECONDS",
                DEFAULT_BUSINESS_METRICS_INTERVAL_SECONDS,
            )?,
            runtime_metrics_interval: seconds(
                "RUNTIME_METRICS_INTERVAL_SECONDS",
                DEFAULT_RUNTIME_METRICS_INTERVAL_SECONDS,
            )?,
            health_scratch_dir,
            // Zero skips the drain.
            drain_period: Duration::from_secs(parse_u64(
                vars,
                "HUB_DRAIN_SECONDS",
                DEFAULT_DRAIN_SECONDS,
            )?),
            memory_limit_bytes: vars
                .contains_key("HUB_MEMORY_LIMIT_BYTES")
                .then(|| parse_positive(vars, "HUB_MEMORY_LIMIT_BYTES", 0))
                .transpose()?,
            sendgrid_api_key: optional_secret(vars, "SENDGRID_API_KEY"),
            google_service_account_key: optional_secret(vars, "GOOGLE_SERVICE_ACCOUNT_KEY"),
            sentry_dsn: optional_secret(vars, "SENTRY_DSN"),
            observability: ObservabilityConfig::from_vars(vars, DEFAULT_LOG_FILTER),
        })
    }

    /// Integrations reported by the external services probe.
    pub fn external_services(&self) -> Vec<ExternalService> {
        vec![
            ExternalService {
                name: "sendgrid",
                configured: self.sendgrid_api_key.is_some(),
            },
            ExternalService {
                name: "google_sheets",
                configured: self.google_service_account_key.is_some(),
            },
            ExternalService {
                name: "sentry",
                configured: self.sentry_dsn.is_some(),
            },
        ]
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            environment: self.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            scratch_dir: self.health_scratch_dir.clone(),
            probe_timeout: self.health_probe_timeout,
            external_services: self.external_services(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::config::LogFormat;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "DATABASE_URL".to_string(),
            "postgresql://localhost/hub_test".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.database_url, "postgresql://localhost/hub_test");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.environment, "development");
        assert_eq!(config.metrics_prefix, "hub");
        assert_eq!(config.slow_request_threshold, Duration::from_secs(1));
        assert_eq!(config.slow_operation_threshold, Duration::from_millis(500));
        assert_eq!(config.health_probe_timeout, Duration::from_millis(2000));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
        assert_eq!(config.business_metrics_interval, Duration::from_secs(60));
        assert_eq!(config.runtime_metrics_interval, Duration::from_secs(15));
        assert_eq!(config.drain_period, Duration::from_secs(30));
        assert_eq!(config.health_scratch_dir, env::temp_dir());
        assert_eq!(config.memory_limit_bytes, None);
        assert!(config.sendgrid_api_key.is_none());
        assert_eq!(config.observability.default_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("HUB_ENVIRONMENT".to_string(), "production".to_string());
        vars.insert("METRICS_PREFIX".to_string(), "sandwich".to_string());
        vars.insert("SLOW_REQUEST_THRESHOLD_MS".to_string(), "250".to_string());
        vars.insert("HEALTH_PROBE_TIMEOUT_MS".to_string(), "750".to_string());
        vars.insert("HEALTH_CHECK_INTERVAL_SECONDS".to_string(), "5".to_string());
        vars.insert("HEALTH_SCRATCH_DIR".to_string(), "/var/tmp".to_string());
        vars.insert("SENDGRID_API_KEY".to_string(), "SG.key".to_string());
        vars.insert("LOG_FORMAT".to_string(), "json".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.environment, "production");
        assert_eq!(config.metrics_prefix, "sandwich");
        assert_eq!(config.slow_request_threshold, Duration::from_millis(250));
        assert_eq!(config.health_probe_timeout, Duration::from_millis(750));
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert_eq!(config.health_scratch_dir, PathBuf::from("/var/tmp"));
        assert!(config.sendgrid_api_key.is_some());
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_database_url() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut vars = base_vars();
        vars.insert("SLOW_OPERATION_THRESHOLD_MS".to_string(), "0".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(
            err.to_string()
                .contains("SLOW_OPERATION_THRESHOLD_MS must be greater than 0"),
            "got: {err}"
        );
    }

    #[test]
    fn test_zero_drain_period_disables_drain() {
        let mut vars = base_vars();
        vars.insert("HUB_DRAIN_SECONDS".to_string(), "0".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.drain_period.is_zero());

        vars.insert("HUB_DRAIN_SECONDS".to_string(), "-1".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_memory_limit() {
        let mut vars = base_vars();
        vars.insert("HUB_MEMORY_LIMIT_BYTES".to_string(), "536870912".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.memory_limit_bytes, Some(536_870_912));

        vars.insert("HUB_MEMORY_LIMIT_BYTES".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_non_numeric_duration_rejected() {
        let mut vars = base_vars();
        vars.insert("RUNTIME_METRICS_INTERVAL_SECONDS".to_string(), "soon".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber(_)));
        assert!(err.to_string().contains("got 'soon'"));
    }

    #[test]
    fn test_invalid_metrics_prefix_rejected() {
        let mut vars = base_vars();
        vars.insert("METRICS_PREFIX".to_string(), "sandwich-hub".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidMetricsPrefix(_))
        ));
    }

    #[test]
    fn test_blank_secret_is_treated_as_missing() {
        let mut vars = base_vars();
        vars.insert("SENTRY_DSN".to_string(), "  ".to_string());
        vars.insert("GOOGLE_SERVICE_ACCOUNT_KEY".to_string(), "{}".to_string());

        let config = Config::from_vars(&vars).unwrap();
        let services = config.external_services();
        let configured: Vec<&str> = services
            .iter()
            .filter(|s| s.configured)
            .map(|s| s.name)
            .collect();
        assert_eq!(configured, vec!["google_sheets"]);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut vars = base_vars();
        vars.insert("SENDGRID_API_KEY".to_string(), "SG.very-secret".to_string());

        let config = Config::from_vars(&vars).unwrap();
        let debug_str = format!("{config:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("postgresql://localhost/hub_test"));
        assert!(!debug_str.contains("SG.very-secret"));
    }

    #[test]
    fn test_health_settings_carry_probe_timeout() {
        let mut vars = base_vars();
        vars.insert("HEALTH_PROBE_TIMEOUT_MS".to_string(), "100".to_string());

        let settings = Config::from_vars(&vars).unwrap().health_settings();
        assert_eq!(settings.probe_timeout, Duration::from_millis(100));
        assert_eq!(settings.external_services.len(), 3);
    }
}
