//! Mock storage for testing.
//!
//! In-memory `Storage` with injectable latency and failure, used by unit
//! tests, the test server harness and the integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::HubError;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{operation_table, NewSandwichCollection, SandwichCollection, Storage};
use crate::instrumentation::{Instrumentable, OperationTable};

/// Mock storage for unit and integration tests.
#[derive(Debug, Default)]
pub struct MockStorage {
    collections: Mutex<Vec<SandwichCollection>>,
    next_id: AtomicI64,
    latency_ms: AtomicU64,
    failing: AtomicBool,
    active_users: AtomicU64,
    active_sessions: AtomicU64,
    call_count: AtomicUsize,
}

impl MockStorage {
    /// Create a mock that answers immediately and never fails.
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Create a mock where every call fails with a database error.
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.set_failing(true);
        mock
    }

    /// Create a mock that waits `latency` before answering each call.
    pub fn with_latency(latency: Duration) -> Self {
        let mock = Self::default();
        mock.set_latency(latency);
        mock
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Value returned by `count_active_users` for every window.
    pub fn set_active_users(&self, count: u64) {
        self.active_users.store(count, Ordering::SeqCst);
    }

    pub fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::SeqCst);
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), HubError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(HubError::Database("Mock storage failure".to_string()));
        }
        Ok(())
    }

    fn collections(&self) -> std::sync::MutexGuard<'_, Vec<SandwichCollection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Instrumentable for MockStorage {
    fn operation_table() -> OperationTable {
        operation_table()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn ping(&self) -> Result<(), HubError> {
        self.simulate().await
    }

    async fn get_sandwich_collections(
        &self,
        limit: i64,
    ) -> Result<Vec<SandwichCollection>, HubError> {
        self.simulate().await?;
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut collections = self.collections().clone();
        collections.sort_by(|a, b| {
            b.collection_date
                .cmp(&a.collection_date)
                .then(b.id.cmp(&a.id))
        });
        collections.truncate(limit);
        Ok(collections)
    }

    async fn create_sandwich_collection(
        &self,
        new: NewSandwichCollection,
    ) -> Result<SandwichCollection, HubError> {
        self.simulate().await?;
        let collection = SandwichCollection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            host_name: new.host_name,
            sandwich_count: new.sandwich_count,
            collection_date: new.collection_date,
            created_at: Utc::now(),
        };
        self.collections().push(collection.clone());
        Ok(collection)
    }

    async fn update_sandwich_collection(
        &self,
        id: i64,
        sandwich_count: i32,
    ) -> Result<Option<SandwichCollection>, HubError> {
        self.simulate().await?;
        let mut collections = self.collections();
        Ok(collections.iter_mut().find(|c| c.id == id).map(|c| {
            c.sandwich_count = sandwich_count;
            c.clone()
        }))
    }

    async fn delete_sandwich_collection(&self, id: i64) -> Result<bool, HubError> {
        self.simulate().await?;
        let mut collections = self.collections();
        let before = collections.len();
        collections.retain(|c| c.id != id);
        Ok(collections.len() < before)
    }

    async fn count_active_users(&self, _since: DateTime<Utc>) -> Result<u64, HubError> {
        self.simulate().await?;
        Ok(self.active_users.load(Ordering::SeqCst))
    }

    async fn count_active_sessions(&self) -> Result<u64, HubError> {
        self.simulate().await?;
        Ok(self.active_sessions.load(Ordering::SeqCst))
    }
}
