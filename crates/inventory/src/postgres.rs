use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EntityId;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    InventoryError, Result, Stock, StockChangeReason, StockItem, StockLog, StockRepository,
};

/// PostgreSQL-backed stock repository.
#[derive(Clone)]
pub struct PostgresStockRepository {
    pool: PgPool,
}

impl PostgresStockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_stock(row: PgRow) -> Result<Stock> {
        Ok(Stock {
            sku_id: row.try_get("sku_id")?,
            available_count: row.try_get::<i32, _>("available_count")? as u32,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_log(row: PgRow) -> Result<StockLog> {
        let id: String = row.try_get("id")?;
        let reason: String = row.try_get("reason")?;
        Ok(StockLog {
            id: id
                .trim()
                .parse::<EntityId>()
                .map_err(|e| InventoryError::Corrupt(e.to_string()))?,
            sku_id: row.try_get("sku_id")?,
            delta: row.try_get("delta")?,
            reason: StockChangeReason::parse(&reason)
                .ok_or_else(|| InventoryError::Corrupt(format!("reason {reason}")))?,
            ref_id: row.try_get("ref_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn append_log(conn: &mut PgConnection, log: &StockLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_logs (id, sku_id, delta, reason, ref_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id.to_string())
        .bind(&log.sku_id)
        .bind(log.delta)
        .bind(log.reason.as_str())
        .bind(&log.ref_id)
        .bind(log.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StockRepository for PostgresStockRepository {
    async fn get(&self, sku_id: &str) -> Result<Option<Stock>> {
        let row = sqlx::query(
            "SELECT sku_id, available_count, version, updated_at FROM stock WHERE sku_id = $1",
        )
        .bind(sku_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_stock).transpose()
    }

    async fn batch_get(&self, sku_ids: &[String]) -> Result<HashMap<String, Stock>> {
        let rows = sqlx::query(
            "SELECT sku_id, available_count, version, updated_at FROM stock WHERE sku_id = ANY($1)",
        )
        .bind(sku_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Self::row_to_stock(row).map(|s| (s.sku_id.clone(), s)))
            .collect()
    }

    async fn deduct(&self, ref_id: &str, items: &[StockItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            let delta = item.signed_quantity()?;
            // The predicate and the write are one atomic statement: this is
            // the oversell barrier.
            let result = sqlx::query(
                r#"
                UPDATE stock
                SET available_count = available_count - $1,
                    version = version + 1,
                    updated_at = NOW()
                WHERE sku_id = $2 AND available_count >= $1
                "#,
            )
            .bind(delta)
            .bind(&item.sku_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back earlier items.
                return Err(InventoryError::InsufficientStock {
                    sku_id: item.sku_id.clone(),
                });
            }

            let log = StockLog::new(
                &item.sku_id,
                -delta,
                StockChangeReason::Deduct,
                ref_id,
            );
            Self::append_log(&mut *tx, &log).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, ref_id: &str, items: &[StockItem]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut skipped = Vec::new();

        for item in items {
            let delta = item.signed_quantity()?;
            let result = sqlx::query(
                r#"
                UPDATE stock
                SET available_count = available_count + $1,
                    version = version + 1,
                    updated_at = NOW()
                WHERE sku_id = $2
                "#,
            )
            .bind(delta)
            .bind(&item.sku_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                skipped.push(item.sku_id.clone());
                continue;
            }

            let log = StockLog::new(
                &item.sku_id,
                delta,
                StockChangeReason::Rollback,
                ref_id,
            );
            Self::append_log(&mut *tx, &log).await?;
        }

        tx.commit().await?;
        Ok(skipped)
    }

    async fn set_stock(&self, sku_id: &str, available_count: u32) -> Result<Stock> {
        let count = StockItem::new(sku_id, available_count).signed_quantity()?;
        let row = sqlx::query(
            r#"
            INSERT INTO stock (sku_id, available_count, version, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (sku_id) DO UPDATE SET
                available_count = EXCLUDED.available_count,
                version = stock.version + 1,
                updated_at = NOW()
            RETURNING sku_id, available_count, version, updated_at
            "#,
        )
        .bind(sku_id)
        .bind(count)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_stock(row)
    }

    async fn logs_for_ref(&self, ref_id: &str) -> Result<Vec<StockLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sku_id, delta, reason, ref_id, created_at
            FROM stock_logs
            WHERE ref_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(ref_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_log).collect()
    }

    async fn net_delta_by_ref(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT ref_id, SUM(delta)::BIGINT AS net
            FROM stock_logs
            WHERE ref_id IN (SELECT DISTINCT ref_id FROM stock_logs WHERE created_at >= $1)
            GROUP BY ref_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut totals = HashMap::with_capacity(rows.len());
        for row in rows {
            totals.insert(row.try_get("ref_id")?, row.try_get("net")?);
        }
        Ok(totals)
    }
}
