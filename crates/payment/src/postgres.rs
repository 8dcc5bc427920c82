use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use outbox::{OutboxEntry, PostgresOutboxStore};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    CallbackUpdate, Payment, PaymentChannel, PaymentError, PaymentLog, PaymentLogAction,
    PaymentRepository, PaymentStatus, Result,
};

const PAYMENT_COLUMNS: &str = "payment_no, id, order_no, user_id, amount, channel, status, \
                               trade_no, notify_url, return_url, paid_at, expired_at, \
                               created_at, updated_at, version";

/// Outbox table written in the same transaction as payment callbacks.
pub const PAYMENT_OUTBOX_TABLE: &str = "payment_outbox";

/// PostgreSQL-backed payment repository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_id(raw: &str) -> Result<EntityId> {
        raw.trim()
            .parse()
            .map_err(|e: common::ParseEntityIdError| PaymentError::Corrupt(e.to_string()))
    }

    fn parse_status(code: i16) -> Result<PaymentStatus> {
        PaymentStatus::from_code(code).ok_or_else(|| PaymentError::Corrupt(format!("status {code}")))
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        let id: String = row.try_get("id")?;
        let channel: String = row.try_get("channel")?;
        Ok(Payment {
            id: Self::parse_id(&id)?,
            payment_no: row.try_get("payment_no")?,
            order_no: row.try_get("order_no")?,
            user_id: row.try_get("user_id")?,
            amount: Money::from_cents(row.try_get("amount")?),
            channel: PaymentChannel::parse(&channel)
                .ok_or_else(|| PaymentError::Corrupt(format!("channel {channel}")))?,
            status: Self::parse_status(row.try_get("status")?)?,
            trade_no: row.try_get("trade_no")?,
            notify_url: row.try_get("notify_url")?,
            return_url: row.try_get("return_url")?,
            paid_at: row.try_get("paid_at")?,
            expired_at: row.try_get("expired_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_log(row: &PgRow) -> Result<PaymentLog> {
        let id: String = row.try_get("id")?;
        let action: String = row.try_get("action")?;
        let from_status: Option<i16> = row.try_get("from_status")?;
        Ok(PaymentLog {
            id: Self::parse_id(&id)?,
            payment_no: row.try_get("payment_no")?,
            action: PaymentLogAction::parse(&action)
                .ok_or_else(|| PaymentError::Corrupt(format!("log action {action}")))?,
            from_status: from_status.map(Self::parse_status).transpose()?,
            to_status: Self::parse_status(row.try_get("to_status")?)?,
            remark: row.try_get("remark")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_log(conn: &mut PgConnection, log: &PaymentLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_logs (id, payment_no, action, from_status, to_status, remark, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id.to_string())
        .bind(&log.payment_no)
        .bind(log.action.as_str())
        .bind(log.from_status.map(|s| s.code()))
        .bind(log.to_status.code())
        .bind(&log.remark)
        .bind(log.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE {clause} ORDER BY created_at DESC, payment_no DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &Payment, log: &PaymentLog) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            INSERT INTO payments ({PAYMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#
        );
        sqlx::query(&sql)
            .bind(&payment.payment_no)
            .bind(payment.id.to_string())
            .bind(&payment.order_no)
            .bind(&payment.user_id)
            .bind(payment.amount.cents())
            .bind(payment.channel.as_str())
            .bind(payment.status.code())
            .bind(payment.trade_no.as_deref())
            .bind(&payment.notify_url)
            .bind(&payment.return_url)
            .bind(payment.paid_at)
            .bind(payment.expired_at)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && matches!(
                        db_err.constraint(),
                        Some("payments_payment_no_key") | Some("uq_payments_open_order")
                    )
                {
                    return PaymentError::DuplicatePayment(payment.order_no.clone());
                }
                PaymentError::Database(e)
            })?;
        Self::insert_log(&mut *tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, payment_no: &str) -> Result<Option<Payment>> {
        self.fetch_one_where("payment_no = $1", payment_no).await
    }

    async fn find_by_order(&self, order_no: &str) -> Result<Option<Payment>> {
        self.fetch_one_where("order_no = $1", order_no).await
    }

    async fn find_by_trade_no(&self, trade_no: &str) -> Result<Option<Payment>> {
        self.fetch_one_where("trade_no = $1", trade_no).await
    }

    async fn apply_callback(
        &self,
        update: &CallbackUpdate,
        log: &PaymentLog,
        outbox: Option<&OutboxEntry>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                trade_no = $2,
                paid_at = COALESCE($3, paid_at),
                updated_at = NOW(),
                version = version + 1
            WHERE payment_no = $4 AND status = $5 AND version = $6
            "#,
        )
        .bind(update.to.code())
        .bind(&update.trade_no)
        .bind(update.paid_at)
        .bind(&update.payment_no)
        .bind(update.from.code())
        .bind(update.expected_version)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("uq_payments_trade_no")
            {
                return PaymentError::TradeNoInUse(update.trade_no.clone());
            }
            PaymentError::Database(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::StaleState(update.payment_no.clone()));
        }
        Self::insert_log(&mut *tx, log).await?;
        if let Some(entry) = outbox {
            PostgresOutboxStore::insert_in_tx(&mut *tx, PAYMENT_OUTBOX_TABLE, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(
        &self,
        payment_no: &str,
        expected_version: i64,
        at: DateTime<Utc>,
        log: &PaymentLog,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, updated_at = $2, version = version + 1
            WHERE payment_no = $3 AND status IN ($4, $5) AND version = $6
            "#,
        )
        .bind(PaymentStatus::Closed.code())
        .bind(at)
        .bind(payment_no)
        .bind(PaymentStatus::Pending.code())
        .bind(PaymentStatus::Processing.code())
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::StaleState(payment_no.to_string()));
        }
        Self::insert_log(&mut *tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE status IN ($1, $2) AND expired_at < $3
            ORDER BY expired_at ASC
            LIMIT $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(PaymentStatus::Pending.code())
            .bind(PaymentStatus::Processing.code())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn append_log(&self, log: &PaymentLog) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_log(&mut *conn, log).await
    }

    async fn logs_for(&self, payment_no: &str) -> Result<Vec<PaymentLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_no, action, from_status, to_status, remark, created_at
            FROM payment_logs
            WHERE payment_no = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(payment_no)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_log).collect()
    }
}
