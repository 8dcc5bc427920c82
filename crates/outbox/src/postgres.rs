use async_trait::async_trait;
use common::EntityId;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{OutboxEntry, OutboxError, OutboxStatus, OutboxStore, Result};

const COLUMNS: &str = "id, event_type, aggregate_id, partition_key, schema_version, payload, \
                       status, retry_count, error_msg, created_at, updated_at";

/// PostgreSQL-backed outbox. Every service has its own table with the same
/// layout, so the table name is a constructor argument.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
    table: &'static str,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool, table: &'static str) -> Self {
        Self { pool, table }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Inserts an entry on a connection that already holds the caller's
    /// domain transaction.
    pub async fn insert_in_tx(
        conn: &mut PgConnection,
        table: &str,
        entry: &OutboxEntry,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        );
        sqlx::query(&sql)
            .bind(entry.id.to_string())
            .bind(&entry.event_type)
            .bind(&entry.aggregate_id)
            .bind(entry.partition_key.as_deref())
            .bind(entry.schema_version as i16)
            .bind(&entry.payload)
            .bind(entry.status.code())
            .bind(entry.retry_count as i32)
            .bind(entry.error_msg.as_deref())
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<OutboxEntry> {
        let id: String = row.try_get("id")?;
        let status: i16 = row.try_get("status")?;
        Ok(OutboxEntry {
            id: id
                .trim()
                .parse()
                .map_err(|e: common::ParseEntityIdError| OutboxError::Corrupt(e.to_string()))?,
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            partition_key: row.try_get("partition_key")?,
            schema_version: row.try_get::<i16, _>("schema_version")? as u16,
            payload: row.try_get("payload")?,
            status: OutboxStatus::from_code(status)
                .ok_or_else(|| OutboxError::Corrupt(format!("status {status}")))?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            error_msg: row.try_get("error_msg")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn insert(&self, entry: OutboxEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_in_tx(&mut *conn, self.table, &entry).await
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = $1 ORDER BY seq ASC LIMIT $2",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::Pending.code())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn fetch_retryable(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = $1 AND retry_count < $2 ORDER BY seq ASC LIMIT $3",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::Failed.code())
            .bind(max_retries as i32)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn mark_sent(&self, id: EntityId) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = $1, error_msg = NULL, updated_at = NOW() WHERE id = $2",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(OutboxStatus::Sent.code())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EntityId, error: &str) -> Result<u32> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = $1, retry_count = retry_count + 1, error_msg = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING retry_count
            "#,
            self.table
        );
        let retries: Option<i32> = sqlx::query_scalar(&sql)
            .bind(OutboxStatus::Failed.code())
            .bind(error)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        retries
            .map(|r| r as u32)
            .ok_or(OutboxError::NotFound(id))
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE aggregate_id = $1 ORDER BY seq ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
