//! Domain counters and gauges for the coordination platform.
//!
//! Authentication, notifications, background jobs, outbound API calls and
//! activity gauges. The `monitor_*` wrappers time an async call, record its
//! outcome and hand the original result back unchanged.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::registry::{CounterHandle, GaugeHandle, HistogramHandle, MetricRegistry, RegistryError};
use super::{observe_safely, short_type_name};

/// External API calls slower than this are logged.
pub const EXTERNAL_API_SLOW_THRESHOLD: Duration = Duration::from_secs(10);

/// Background jobs slower than this are logged.
pub const BACKGROUND_JOB_SLOW_THRESHOLD: Duration = Duration::from_secs(300);

const AUTH_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
const JOB_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0];
const EXTERNAL_API_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Local,
    OpenId,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Local => "local",
            AuthMethod::OpenId => "openid",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Outcome label shared by the business counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }

    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
        }
    }
}

/// Look-back window for the active users gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityWindow {
    FiveMinutes,
    OneHour,
    OneDay,
}

impl ActivityWindow {
    pub const ALL: [ActivityWindow; 3] = [
        ActivityWindow::FiveMinutes,
        ActivityWindow::OneHour,
        ActivityWindow::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityWindow::FiveMinutes => "5m",
            ActivityWindow::OneHour => "1h",
            ActivityWindow::OneDay => "24h",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ActivityWindow::FiveMinutes => Duration::from_secs(5 * 60),
            ActivityWindow::OneHour => Duration::from_secs(60 * 60),
            ActivityWindow::OneDay => Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusinessMetrics {
    auth_attempts: CounterHandle,
    auth_duration: HistogramHandle,
    notifications: CounterHandle,
    jobs: CounterHandle,
    job_duration: HistogramHandle,
    job_errors: CounterHandle,
    external_calls: CounterHandle,
    external_duration: HistogramHandle,
    external_errors: CounterHandle,
    active_users: GaugeHandle,
    active_sessions: GaugeHandle,
    realtime_connections: GaugeHandle,
}

impl BusinessMetrics {
    /// Register every business family under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if any family conflicts with an existing one.
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            auth_attempts: registry.register_counter(
                &format!("{prefix}_auth_attempts_total"),
                "Authentication attempts by method and outcome",
                &["method", "status"],
            )?,
            auth_duration: registry.register_histogram(
                &format!("{prefix}_auth_duration_seconds"),
                "Authentication duration in seconds",
                &["method"],
                AUTH_BUCKETS,
            )?,
            notifications: registry.register_counter(
                &format!("{prefix}_notifications_total"),
                "Notifications sent by channel, type and outcome",
                &["channel", "notification_type", "status"],
            )?,
            jobs: registry.register_counter(
                &format!("{prefix}_background_jobs_total"),
                "Background job runs by type and outcome",
                &["job_type", "status"],
            )?,
            job_duration: registry.register_histogram(
                &format!("{prefix}_background_job_duration_seconds"),
                "Background job duration in seconds",
                &["job_type"],
                JOB_BUCKETS,
            )?,
            job_errors: registry.register_counter(
                &format!("{prefix}_background_job_errors_total"),
                "Background job failures by type and error type",
                &["job_type", "error_type"],
            )?,
            external_calls: registry.register_counter(
                &format!("{prefix}_external_api_calls_total"),
                "Outbound API calls by service, operation and outcome",
                &["service", "operation", "status"],
            )?,
            external_duration: registry.register_histogram(
                &format!("{prefix}_external_api_duration_seconds"),
                "Outbound API call duration in seconds",
                &["service", "operation"],
                EXTERNAL_API_BUCKETS,
            )?,
            external_errors: registry.register_counter(
                &format!("{prefix}_external_api_errors_total"),
                "Outbound API failures by service and error type",
                &["service", "error_type"],
            )?,
            active_users: registry.register_gauge(
                &format!("{prefix}_active_users"),
                "Distinct users active within the window",
                &["window"],
            )?,
            active_sessions: registry.register_gauge(
                &format!("{prefix}_active_sessions"),
                "Unexpired login sessions",
                &[],
            )?,
            realtime_connections: registry.register_gauge(
                &format!("{prefix}_realtime_connections"),
                "Connected realtime clients",
                &[],
            )?,
        })
    }

    pub fn record_auth_attempt(
        &self,
        method: AuthMethod,
        outcome: Outcome,
        duration: Option<Duration>,
    ) {
        observe_safely("auth", || {
            self.auth_attempts.increment(
                &[("method", method.as_str()), ("status", outcome.as_str())],
                1,
            );
            if let Some(duration) = duration {
                self.auth_duration
                    .observe_duration(&[("method", method.as_str())], duration);
            }
        });
    }

    pub fn record_notification(
        &self,
        channel: NotificationChannel,
        notification_type: &str,
        outcome: Outcome,
    ) {
        observe_safely("notification", || {
            self.notifications.increment(
                &[
                    ("channel", channel.as_str()),
                    ("notification_type", notification_type),
                    ("status", outcome.as_str()),
                ],
                1,
            );
        });
    }

    pub fn record_background_job(&self, job_type: &str, outcome: Outcome, duration: Duration) {
        observe_safely("background_job", || {
            self.jobs.increment(
                &[("job_type", job_type), ("status", outcome.as_str())],
                1,
            );
            self.job_duration
                .observe_duration(&[("job_type", job_type)], duration);
        });
    }

    pub fn record_external_api_call(
        &self,
        service: &str,
        operation: &str,
        outcome: Outcome,
        duration: Duration,
    ) {
        observe_safely("external_api", || {
            self.external_calls.increment(
                &[
                    ("service", service),
                    ("operation", operation),
                    ("status", outcome.as_str()),
                ],
                1,
            );
            self.external_duration.observe_duration(
                &[("service", service), ("operation", operation)],
                duration,
            );
        });
    }

    /// Time an outbound API call and record its outcome.
    ///
    /// The call's result, success or error, is returned unchanged.
    pub async fn monitor_external_api<T, E, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        call: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let result = call().await;
        let elapsed = start.elapsed();

        self.record_external_api_call(service, operation, Outcome::of(&result), elapsed);

        if let Err(e) = &result {
            let error_type = short_type_name::<E>();
            observe_safely("external_api", || {
                self.external_errors
                    .increment(&[("service", service), ("error_type", error_type)], 1);
            });
            warn!(
                target: "hub.business",
                service,
                operation,
                error_type,
                error = %e,
                "External API call failed"
            );
        }

        if elapsed > EXTERNAL_API_SLOW_THRESHOLD {
            warn!(
                target: "hub.business",
                service,
                operation,
                duration_ms = elapsed.as_millis(),
                "Slow external API call"
            );
        }

        result
    }

    /// Time a background job and record its outcome.
    ///
    /// The job's result, success or error, is returned unchanged.
    pub async fn monitor_background_job<T, E, F, Fut>(&self, job_type: &str, job: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let result = job().await;
        let elapsed = start.elapsed();

        self.record_background_job(job_type, Outcome::of(&result), elapsed);

        match &result {
            Ok(_) => {
                debug!(
                    target: "hub.business",
                    job_type,
                    duration_ms = elapsed.as_millis(),
                    "Background job completed"
                );
            }
            Err(e) => {
                let error_type = short_type_name::<E>();
                observe_safely("background_job", || {
                    self.job_errors
                        .increment(&[("job_type", job_type), ("error_type", error_type)], 1);
                });
                warn!(
                    target: "hub.business",
                    job_type,
                    error_type,
                    error = %e,
                    "Background job failed"
                );
            }
        }

        if elapsed > BACKGROUND_JOB_SLOW_THRESHOLD {
            warn!(
                target: "hub.business",
                job_type,
                duration_ms = elapsed.as_millis(),
                "Slow background job"
            );
        }

        result
    }

    pub fn set_active_users(&self, window: ActivityWindow, count: u64) {
        #[allow(clippy::cast_precision_loss)]
        self.active_users
            .set(&[("window", window.as_str())], count as f64);
    }

    pub fn set_active_sessions(&self, count: u64) {
        #[allow(clippy::cast_precision_loss)]
        self.active_sessions.set(&[], count as f64);
    }

    /// Gauge fed by the realtime connection tracker.
    pub fn realtime_connections(&self) -> GaugeHandle {
        self.realtime_connections.clone()
    }
}
