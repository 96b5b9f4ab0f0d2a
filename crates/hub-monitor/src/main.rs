//! Sandwich Hub monitor
//!
//! Serves metrics, health and dashboard endpoints for the coordination hub
//! and keeps the background gauges current.

use common::config::{LogFormat, ObservabilityConfig};
use hub_monitor::config::Config;
use hub_monitor::health::{HealthAggregator, ProcessMemory};
use hub_monitor::instrumentation::Instrumented;
use hub_monitor::observability::tracer::TracingTracer;
use hub_monitor::observability::Telemetry;
use hub_monitor::realtime::ConnectionTracker;
use hub_monitor::routes::{self, AppState};
use hub_monitor::storage::{PgStorage, Storage};
use hub_monitor::tasks;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    match observability.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first so the log format is known
    let config = Config::from_env().inspect_err(|e| {
        eprintln!("Failed to load configuration: {e}");
    })?;

    init_tracing(&config.observability);

    info!(target: "hub.monitor", "Starting hub monitor");
    info!(
        target: "hub.monitor",
        bind_address = %config.bind_address,
        environment = %config.environment,
        metrics_prefix = %config.metrics_prefix,
        "Configuration loaded successfully"
    );

    let telemetry = Telemetry::init(&config.metrics_prefix, Arc::new(TracingTracer))
        .inspect_err(|e| error!(target: "hub.monitor", error = %e, "Failed to register metrics"))?;

    info!(target: "hub.monitor", "Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .inspect_err(|e| {
            error!(target: "hub.monitor", error = %e, "Failed to connect to database");
        })?;
    info!(target: "hub.monitor", "Database connection established");

    let storage: Arc<dyn Storage> = Arc::new(Instrumented::new(
        PgStorage::new(pool),
        telemetry.operation_instrumentation(config.slow_operation_threshold),
    ));

    let realtime = Arc::new(ConnectionTracker::new(Some(
        telemetry.business.realtime_connections(),
    )));
    let health = Arc::new(
        HealthAggregator::new(
            Arc::clone(&storage),
            Arc::new(ProcessMemory::new(config.memory_limit_bytes)),
            config.health_settings(),
        )
        .with_realtime(realtime),
    );

    let bind_address = config.bind_address.clone();
    let drain_period = config.drain_period;
    let state = Arc::new(AppState::new(
        config,
        telemetry,
        Arc::clone(&storage),
        Arc::clone(&health),
    ));

    // Background tasks
    let cancel_token = CancellationToken::new();
    let task_handles = vec![
        tokio::spawn(tasks::start_business_metrics_updater(
            Arc::clone(&storage),
            state.telemetry.business.clone(),
            state.config.business_metrics_interval,
            cancel_token.child_token(),
        )),
        tokio::spawn(tasks::start_health_monitor(
            health,
            state.telemetry.health.clone(),
            state.config.health_check_interval,
            cancel_token.child_token(),
        )),
        tokio::spawn(tasks::start_runtime_sampler(
            state.telemetry.runtime.clone(),
            state.config.runtime_metrics_interval,
            cancel_token.child_token(),
        )),
    ];

    let app = routes::build_routes(state);

    let addr: SocketAddr = bind_address.parse().inspect_err(|e| {
        error!(target: "hub.monitor", error = %e, "Invalid bind address");
    })?;

    info!(target: "hub.monitor", %addr, "Hub monitor listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(drain_period))
        .await?;

    cancel_token.cancel();
    for handle in task_handles {
        if let Err(e) = handle.await {
            warn!(target: "hub.monitor", error = %e, "Background task ended abnormally");
        }
    }

    info!(target: "hub.monitor", "Hub monitor shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!(target: "hub.monitor", "Received SIGINT, starting graceful shutdown...");
            }
            Err(e) => error!(target: "hub.monitor", error = %e, "Failed to listen for SIGINT"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(target: "hub.monitor", "Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!(target: "hub.monitor", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_period.is_zero() {
        info!(target: "hub.monitor", "Skipping drain period");
    } else {
        warn!(
            target: "hub.monitor",
            drain_seconds = drain_period.as_secs(),
            "Draining connections..."
        );
        tokio::time::sleep(drain_period).await;
        info!(target: "hub.monitor", "Drain period complete");
    }
}
