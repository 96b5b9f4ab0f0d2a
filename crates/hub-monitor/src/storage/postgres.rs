//! Postgres-backed `Storage`.
//!
//! All queries are parameterized. Rows are mapped by column name so the
//! crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::HubError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{operation_table, NewSandwichCollection, SandwichCollection, Storage};
use crate::instrumentation::{Instrumentable, OperationTable};

const COLLECTION_COLUMNS: &str = "id, host_name, sandwich_count, collection_date, created_at";

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Instrumentable for PgStorage {
    fn operation_table() -> OperationTable {
        operation_table()
    }
}

fn db_error(e: sqlx::Error) -> HubError {
    HubError::Database(e.to_string())
}

fn collection_from_row(row: &PgRow) -> Result<SandwichCollection, sqlx::Error> {
    Ok(SandwichCollection {
        id: row.try_get("id")?,
        host_name: row.try_get("host_name")?,
        sandwich_count: row.try_get("sandwich_count")?,
        collection_date: row.try_get("collection_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[async_trait]
impl Storage for PgStorage {
    async fn ping(&self) -> Result<(), HubError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db_error)
    }

    #[instrument(skip_all, fields(limit = limit))]
    async fn get_sandwich_collections(
        &self,
        limit: i64,
    ) -> Result<Vec<SandwichCollection>, HubError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM sandwich_collections \
             ORDER BY collection_date DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(collection_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)
    }

    #[instrument(skip_all)]
    async fn create_sandwich_collection(
        &self,
        new: NewSandwichCollection,
    ) -> Result<SandwichCollection, HubError> {
        let row = sqlx::query(&format!(
            "INSERT INTO sandwich_collections (host_name, sandwich_count, collection_date) \
             VALUES ($1, $2, $3) RETURNING {COLLECTION_COLUMNS}"
        ))
        .bind(&new.host_name)
        .bind(new.sandwich_count)
        .bind(new.collection_date)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        collection_from_row(&row).map_err(db_error)
    }

    #[instrument(skip_all, fields(id = id))]
    async fn update_sandwich_collection(
        &self,
        id: i64,
        sandwich_count: i32,
    ) -> Result<Option<SandwichCollection>, HubError> {
        let row = sqlx::query(&format!(
            "UPDATE sandwich_collections SET sandwich_count = $2 \
             WHERE id = $1 RETURNING {COLLECTION_COLUMNS}"
        ))
        .bind(id)
        .bind(sandwich_count)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref()
            .map(collection_from_row)
            .transpose()
            .map_err(db_error)
    }

    #[instrument(skip_all, fields(id = id))]
    async fn delete_sandwich_collection(&self, id: i64) -> Result<bool, HubError> {
        let result = sqlx::query("DELETE FROM sandwich_collections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_active_users(&self, since: DateTime<Utc>) -> Result<u64, HubError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_id) FROM user_activity_logs WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count_to_u64(count))
    }

    async fn count_active_sessions(&self) -> Result<u64, HubError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE expire > NOW()")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(count_to_u64(count))
    }
}
