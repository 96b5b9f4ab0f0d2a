//! Storage seam for the hub.
//!
//! `Storage` is the data-access interface the rest of the service (and the
//! health probes) talk to. `PgStorage` is the Postgres implementation and
//! `mock::MockStorage` the in-memory test double. Production code wraps the
//! real implementation in `Instrumented` so every call is measured.

pub mod mock;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::error::HubError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::instrumentation::{Instrumented, OperationKind, OperationTable};

pub use postgres::PgStorage;

/// Weekly sandwich collection reported by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandwichCollection {
    pub id: i64,
    pub host_name: String,
    pub sandwich_count: i32,
    pub collection_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSandwichCollection {
    pub host_name: String,
    pub sandwich_count: i32,
    pub collection_date: NaiveDate,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Minimal round trip used by health checks.
    async fn ping(&self) -> Result<(), HubError>;

    /// Most recent collections first.
    async fn get_sandwich_collections(
        &self,
        limit: i64,
    ) -> Result<Vec<SandwichCollection>, HubError>;

    async fn create_sandwich_collection(
        &self,
        new: NewSandwichCollection,
    ) -> Result<SandwichCollection, HubError>;

    /// Returns `None` if no collection has this id.
    async fn update_sandwich_collection(
        &self,
        id: i64,
        sandwich_count: i32,
    ) -> Result<Option<SandwichCollection>, HubError>;

    /// Returns whether a row was deleted.
    async fn delete_sandwich_collection(&self, id: i64) -> Result<bool, HubError>;

    /// Distinct users with activity at or after `since`.
    async fn count_active_users(&self, since: DateTime<Utc>) -> Result<u64, HubError>;

    /// Unexpired login sessions.
    async fn count_active_sessions(&self) -> Result<u64, HubError>;
}

/// Operation tags for every `Storage` method.
pub fn operation_table() -> OperationTable {
    OperationTable::new()
        .tag("ping", OperationKind::Select, "health_check")
        .infer("get_sandwich_collections")
        .infer("create_sandwich_collection")
        .infer("update_sandwich_collection")
        .infer("delete_sandwich_collection")
        .tag("count_active_users", OperationKind::Select, "users")
        .tag("count_active_sessions", OperationKind::Select, "sessions")
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn ping(&self) -> Result<(), HubError> {
        (**self).ping().await
    }

    async fn get_sandwich_collections(
        &self,
        limit: i64,
    ) -> Result<Vec<SandwichCollection>, HubError> {
        (**self).get_sandwich_collections(limit).await
    }

    async fn create_sandwich_collection(
        &self,
        new: NewSandwichCollection,
    ) -> Result<SandwichCollection, HubError> {
        (**self).create_sandwich_collection(new).await
    }

    async fn update_sandwich_collection(
        &self,
        id: i64,
        sandwich_count: i32,
    ) -> Result<Option<SandwichCollection>, HubError> {
        (**self).update_sandwich_collection(id, sandwich_count).await
    }

    async fn delete_sandwich_collection(&self, id: i64) -> Result<bool, HubError> {
        (**self).delete_sandwich_collection(id).await
    }

    async fn count_active_users(&self, since: DateTime<Utc>) -> Result<u64, HubError> {
        (**self).count_active_users(since).await
    }

    async fn count_active_sessions(&self) -> Result<u64, HubError> {
        (**self).count_active_sessions().await
    }
}

#[async_trait]
impl<S: Storage> Storage for Instrumented<S> {
    async fn ping(&self) -> Result<(), HubError> {
        self.call("ping", |s| s.ping()).await
    }

    async fn get_sandwich_collections(
        &self,
        limit: i64,
    ) -> Result<Vec<SandwichCollection>, HubError> {
        self.call("get_sandwich_collections", |s| s.get_sandwich_collections(limit))
            .await
    }

    async fn create_sandwich_collection(
        &self,
        new: NewSandwichCollection,
    ) -> Result<SandwichCollection, HubError> {
        self.call("create_sandwich_collection", move |s| {
            s.create_sandwich_collection(new)
        })
        .await
    }

    async fn update_sandwich_collection(
        &self,
        id: i64,
        sandwich_count: i32,
    ) -> Result<Option<SandwichCollection>, HubError> {
        self.call("update_sandwich_collection", |s| {
            s.update_sandwich_collection(id, sandwich_count)
        })
        .await
    }

    async fn delete_sandwich_collection(&self, id: i64) -> Result<bool, HubError> {
        self.call("delete_sandwich_collection", |s| s.delete_sandwich_collection(id))
            .await
    }

    async fn count_active_users(&self, since: DateTime<Utc>) -> Result<u64, HubError> {
        self.call("count_active_users", |s| s.count_active_users(since))
            .await
    }

    async fn count_active_sessions(&self) -> Result<u64, HubError> {
        self.call("count_active_sessions", |s| s.count_active_sessions())
            .await
    }
}
