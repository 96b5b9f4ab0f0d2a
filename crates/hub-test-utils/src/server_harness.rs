//! Test server harness for E2E testing
//!
//! Provides `TestMonitorServer` for spawning the real monitoring router in
//! tests, backed by `MockStorage`, fixed memory readings and a recording
//! tracer.

use axum::Router;
use hub_monitor::config::Config;
use hub_monitor::health::{HealthAggregator, StaticMemory};
use hub_monitor::instrumentation::Instrumented;
use hub_monitor::observability::tracer::mock::RecordingTracer;
use hub_monitor::observability::Telemetry;
use hub_monitor::realtime::ConnectionTracker;
use hub_monitor::routes::{self, AppState};
use hub_monitor::storage::mock::MockStorage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Memory ratio reported by the harness memory probe (healthy).
pub const TEST_MEMORY_RATIO: f64 = 0.3;

/// Collaborators behind a test `AppState`.
pub struct TestState {
    pub state: Arc<AppState>,
    pub tracer: Arc<RecordingTracer>,
    pub realtime: Arc<ConnectionTracker>,
}

/// Build application state over `storage` with test configuration.
///
/// Storage is wrapped in the instrumenting proxy, exactly as the binary
/// wraps the Postgres backend.
pub fn test_state(storage: Arc<MockStorage>) -> Result<TestState, anyhow::Error> {
    let vars = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("HUB_ENVIRONMENT".to_string(), "test".to_string()),
        ("SENDGRID_API_KEY".to_string(), "SG.test-key".to_string()),
    ]);
    let config = Config::from_vars(&vars)
        .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

    let tracer = Arc::new(RecordingTracer::new());
    let telemetry = Telemetry::init(&config.metrics_prefix, tracer.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let storage: Arc<dyn hub_monitor::storage::Storage> = Arc::new(Instrumented::new(
        storage,
        telemetry.operation_instrumentation(config.slow_operation_threshold),
    ));
    let realtime = Arc::new(ConnectionTracker::new(Some(
        telemetry.business.realtime_connections(),
    )));
    let health = Arc::new(
        HealthAggregator::new(
            Arc::clone(&storage),
            Arc::new(StaticMemory::at_ratio(TEST_MEMORY_RATIO)),
            config.health_settings(),
        )
        .with_realtime(realtime.clone()),
    );

    Ok(TestState {
        state: Arc::new(AppState::new(config, telemetry, storage, health)),
        tracer,
        realtime,
    })
}

/// Test harness for spawning the monitoring server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestMonitorServer::spawn(Arc::new(MockStorage::healthy())).await?;
///
///     let response = reqwest::get(format!("{}/health/live", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestMonitorServer {
    addr: SocketAddr,
    storage: Arc<MockStorage>,
    parts: TestState,
    _handle: JoinHandle<()>,
}

impl TestMonitorServer {
    /// Spawn a server exposing only the monitoring routes.
    pub async fn spawn(storage: Arc<MockStorage>) -> Result<Self, anyhow::Error> {
        Self::spawn_with_app(storage, Router::new()).await
    }

    /// Spawn a server with `app` merged under the monitoring layers.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_app(
        storage: Arc<MockStorage>,
        app: Router,
    ) -> Result<Self, anyhow::Error> {
        let parts = test_state(Arc::clone(&storage))?;
        let app = routes::with_monitoring(app, Arc::clone(&parts.state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            storage,
            parts,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Application state shared with the running server.
    pub fn state(&self) -> &Arc<AppState> {
        &self.parts.state
    }

    /// The mock behind the instrumented storage.
    pub fn storage(&self) -> &Arc<MockStorage> {
        &self.storage
    }

    /// Spans and errors captured while serving requests.
    pub fn tracer(&self) -> &RecordingTracer {
        &self.parts.tracer
    }

    /// Realtime connection tracker reported by the detailed health check.
    pub fn realtime(&self) -> &ConnectionTracker {
        &self.parts.realtime
    }
}

impl Drop for TestMonitorServer {
    fn drop(&mut self) {
        // Stop the server task as soon as the test completes
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestMonitorServer::spawn(Arc::new(MockStorage::healthy())).await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health/live", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "alive");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_provides_addr() -> Result<(), anyhow::Error> {
        let server = TestMonitorServer::spawn(Arc::new(MockStorage::healthy())).await?;

        let addr = server.addr();
        assert!(addr.ip().is_loopback());
        assert!(addr.port() > 0);
        assert_eq!(server.url(), format!("http://{}", addr));

        Ok(())
    }

    #[test]
    fn test_state_uses_test_environment() -> Result<(), anyhow::Error> {
        let parts = test_state(Arc::new(MockStorage::healthy()))?;
        assert_eq!(parts.state.config.environment, "test");
        assert_eq!(parts.state.config.metrics_prefix, "hub");
        Ok(())
    }
}
