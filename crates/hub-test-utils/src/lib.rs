//! # Hub Test Utilities
//!
//! Shared test utilities for the hub monitor.
//!
//! This crate provides:
//! - Server test harness (`TestMonitorServer` for E2E tests)
//! - `test_state` for building an `AppState` over mock collaborators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestMonitorServer::spawn(Arc::new(MockStorage::healthy())).await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .get(&format!("{}/health", server.url()))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
