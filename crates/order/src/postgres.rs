use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EntityId, Money, OrderType};
use outbox::{OutboxEntry, PostgresOutboxStore};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{Order, OrderError, OrderItem, OrderRepository, OrderStatus, Receiver, Result};

const ORDER_COLUMNS: &str = "order_no, id, user_id, order_type, status, total_amount, \
                             discount_amount, shipping_amount, pay_amount, receiver, buyer_remark, \
                             pay_channel, pay_trade_no, created_at, paid_at, shipped_at, \
                             completed_at, closed_at, updated_at, version";

/// Outbox table written in the same transaction as orders.
pub const ORDER_OUTBOX_TABLE: &str = "order_outbox";

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_id(raw: &str) -> Result<EntityId> {
        raw.trim()
            .parse()
            .map_err(|e: common::ParseEntityIdError| OrderError::Corrupt(e.to_string()))
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let id: String = row.try_get("id")?;
        let order_type: String = row.try_get("order_type")?;
        let status: i16 = row.try_get("status")?;
        let receiver: serde_json::Value = row.try_get("receiver")?;

        Ok(Order {
            id: Self::parse_id(&id)?,
            order_no: row.try_get("order_no")?,
            user_id: row.try_get("user_id")?,
            order_type: OrderType::parse(&order_type)
                .ok_or_else(|| OrderError::Corrupt(format!("order_type {order_type}")))?,
            status: OrderStatus::from_code(status)
                .ok_or_else(|| OrderError::Corrupt(format!("status {status}")))?,
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            discount_amount: Money::from_cents(row.try_get("discount_amount")?),
            shipping_amount: Money::from_cents(row.try_get("shipping_amount")?),
            pay_amount: Money::from_cents(row.try_get("pay_amount")?),
            receiver: serde_json::from_value::<Receiver>(receiver)?,
            buyer_remark: row.try_get("buyer_remark")?,
            items: Vec::new(),
            pay_channel: row.try_get("pay_channel")?,
            pay_trade_no: row.try_get("pay_trade_no")?,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
            shipped_at: row.try_get("shipped_at")?,
            completed_at: row.try_get("completed_at")?,
            closed_at: row.try_get("closed_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let id: String = row.try_get("id")?;
        Ok(OrderItem {
            id: Self::parse_id(&id)?,
            order_no: row.try_get("order_no")?,
            product_id: row.try_get("product_id")?,
            sku_id: row.try_get("sku_id")?,
            product_title: row.try_get("product_title")?,
            product_image: row.try_get("product_image")?,
            sku_name: row.try_get("sku_name")?,
            unit_price: Money::from_cents(row.try_get("unit_price")?),
            quantity: u32::try_from(row.try_get::<i32, _>("quantity")?)
                .map_err(|_| OrderError::Corrupt(format!("negative quantity in order item {id}")))?,
            subtotal: Money::from_cents(row.try_get("subtotal")?),
        })
    }

    /// Loads items for the given orders with one query and attaches them.
    async fn attach_items(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let order_nos: Vec<String> = orders.iter().map(|o| o.order_no.clone()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, order_no, product_id, sku_id, product_title, product_image,
                   sku_name, unit_price, quantity, subtotal
            FROM order_items
            WHERE order_no = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(&order_nos)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<String, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let item = Self::row_to_item(row)?;
            by_order.entry(item.order_no.clone()).or_default().push(item);
        }
        for order in orders.iter_mut() {
            order.items = by_order.remove(&order.order_no).unwrap_or_default();
        }
        Ok(())
    }

    async fn insert_items(conn: &mut PgConnection, order: &Order) -> Result<()> {
        for item in &order.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                OrderError::Validation(format!("quantity for {} is out of range", item.sku_id))
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_no, product_id, sku_id, product_title,
                                         product_image, sku_name, unit_price, quantity, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(item.id.to_string())
            .bind(&item.order_no)
            .bind(&item.product_id)
            .bind(&item.sku_id)
            .bind(&item.product_title)
            .bind(&item.product_image)
            .bind(&item.sku_name)
            .bind(item.unit_price.cents())
            .bind(quantity)
            .bind(item.subtotal.cents())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        self.attach_items(&mut orders).await?;
        Ok(orders)
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order, outbox: &[OutboxEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let receiver = serde_json::to_value(&order.receiver)?;

        let sql = format!(
            r#"
            INSERT INTO orders ({ORDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#
        );
        sqlx::query(&sql)
            .bind(&order.order_no)
            .bind(order.id.to_string())
            .bind(&order.user_id)
            .bind(order.order_type.as_str())
            .bind(order.status.code())
            .bind(order.total_amount.cents())
            .bind(order.discount_amount.cents())
            .bind(order.shipping_amount.cents())
            .bind(order.pay_amount.cents())
            .bind(receiver)
            .bind(&order.buyer_remark)
            .bind(order.pay_channel.as_deref())
            .bind(order.pay_trade_no.as_deref())
            .bind(order.created_at)
            .bind(order.paid_at)
            .bind(order.shipped_at)
            .bind(order.completed_at)
            .bind(order.closed_at)
            .bind(order.updated_at)
            .bind(order.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("orders_order_no_key")
                {
                    return OrderError::DuplicateOrderNo(order.order_no.clone());
                }
                OrderError::Database(e)
            })?;

        Self::insert_items(&mut *tx, order).await?;
        for entry in outbox {
            PostgresOutboxStore::insert_in_tx(&mut *tx, ORDER_OUTBOX_TABLE, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, order_no: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1");
        let rows = sqlx::query(&sql)
            .bind(order_no)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.hydrate(rows).await?.pop())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Order>, u64)> {
        let status_code = status.map(|s| s.code());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM orders
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status_code)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status = $2)
            ORDER BY created_at DESC, order_no DESC
            OFFSET $3 LIMIT $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(status_code)
            .bind(offset as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok((self.hydrate(rows).await?, total as u64))
    }

    async fn transition(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1,
                version = version + 1,
                updated_at = $2,
                shipped_at = CASE WHEN $1 = 3 THEN $2 ELSE shipped_at END,
                completed_at = CASE WHEN $1 = 4 THEN $2 ELSE completed_at END,
                closed_at = CASE WHEN $1 IN (5, 8) THEN $2 ELSE closed_at END
            WHERE order_no = $3 AND status = $4 AND version = $5
            "#,
        )
        .bind(to.code())
        .bind(at)
        .bind(order_no)
        .bind(from.code())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::StaleState(order_no.to_string()));
        }
        Ok(())
    }

    async fn mark_paid(
        &self,
        order_no: &str,
        expected_version: i64,
        channel: &str,
        trade_no: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1,
                pay_channel = $2,
                pay_trade_no = $3,
                paid_at = $4,
                updated_at = $4,
                version = version + 1
            WHERE order_no = $5 AND status = $6 AND version = $7
            "#,
        )
        .bind(OrderStatus::Paid.code())
        .bind(channel)
        .bind(trade_no)
        .bind(paid_at)
        .bind(order_no)
        .bind(OrderStatus::PendingPay.code())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::StaleState(order_no.to_string()));
        }
        Ok(())
    }

    async fn find_expired_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(OrderStatus::PendingPay.code())
            .bind(created_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }
}
