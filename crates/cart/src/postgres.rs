use async_trait::async_trait;
use common::Money;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{CartError, CartItem, CartStore, Result};

const CART_COLUMNS: &str = "id, user_id, product_id, sku_id, product_title, product_image, \
                            sku_name, unit_price, current_price, quantity, stock_hint, \
                            is_valid, invalid_reason, created_at, updated_at";

/// PostgreSQL-backed durable cart store.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_item(row: &PgRow) -> Result<CartItem> {
        let id: String = row.try_get("id")?;
        Ok(CartItem {
            id: id
                .trim()
                .parse()
                .map_err(|e: common::ParseEntityIdError| CartError::Corrupt(e.to_string()))?,
            user_id: row.try_get("user_id")?,
            product_id: row.try_get("product_id")?,
            sku_id: row.try_get("sku_id")?,
            product_title: row.try_get("product_title")?,
            product_image: row.try_get("product_image")?,
            sku_name: row.try_get("sku_name")?,
            unit_price: Money::from_cents(row.try_get("unit_price")?),
            current_price: Money::from_cents(row.try_get("current_price")?),
            quantity: u32::try_from(row.try_get::<i32, _>("quantity")?)
                .map_err(|_| CartError::Corrupt(format!("negative quantity in cart line {id}")))?,
            stock_hint: row.try_get::<i32, _>("stock_hint")?.max(0) as u32,
            is_valid: row.try_get("is_valid")?,
            invalid_reason: row.try_get("invalid_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, user_id = %item.user_id))]
    async fn upsert(&self, item: &CartItem) -> Result<()> {
        let quantity = i32::try_from(item.quantity).map_err(|_| {
            CartError::Validation(format!("quantity for {} is out of range", item.sku_id))
        })?;
        sqlx::query(
            r#"
            INSERT INTO cart_items (id, user_id, product_id, sku_id, product_title,
                                    product_image, sku_name, unit_price, current_price,
                                    quantity, stock_hint, is_valid, invalid_reason,
                                    created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                product_title = EXCLUDED.product_title,
                product_image = EXCLUDED.product_image,
                sku_name = EXCLUDED.sku_name,
                current_price = EXCLUDED.current_price,
                quantity = EXCLUDED.quantity,
                stock_hint = EXCLUDED.stock_hint,
                is_valid = EXCLUDED.is_valid,
                invalid_reason = EXCLUDED.invalid_reason,
                updated_at = EXCLUDED.updated_at
            WHERE cart_items.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(item.id.to_string())
        .bind(&item.user_id)
        .bind(&item.product_id)
        .bind(&item.sku_id)
        .bind(&item.product_title)
        .bind(&item.product_image)
        .bind(&item.sku_name)
        .bind(item.unit_price.cents())
        .bind(item.current_price.cents())
        .bind(quantity)
        .bind(item.stock_hint.min(i32::MAX as u32) as i32)
        .bind(item.is_valid)
        .bind(&item.invalid_reason)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
            .bind(item_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_item).collect()
    }
}

