use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::MAX_QUANTITY;

use crate::{InventoryError, Result, Stock, StockItem, StockLog, StockRepository};

/// Inventory operations exposed to other services.
///
/// The service does not persist idempotency state: `order_no` is only a
/// correlation id written to the log. A re-issued deduct for the same order
/// simply deducts again, so callers must not retry blindly.
#[derive(Clone)]
pub struct InventoryService {
    repo: Arc<dyn StockRepository>,
}

impl InventoryService {
    pub fn new(repo: Arc<dyn StockRepository>) -> Self {
        Self { repo }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_stock(&self, sku_id: &str) -> Result<Option<Stock>> {
        if sku_id.trim().is_empty() {
            return Err(InventoryError::InvalidArgument("sku_id is required".into()));
        }
        self.repo.get(sku_id).await
    }

    #[tracing::instrument(skip(self), fields(count = sku_ids.len()))]
    pub async fn batch_get_stock(&self, sku_ids: &[String]) -> Result<HashMap<String, Stock>> {
        if sku_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.repo.batch_get(sku_ids).await
    }

    /// Deducts every item for `order_no` in one local transaction.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn deduct(&self, order_no: &str, items: &[StockItem]) -> Result<()> {
        let merged = validate(order_no, items)?;

        match self.repo.deduct(order_no, &merged).await {
            Ok(()) => {
                metrics::counter!("inventory_deduct_total", "outcome" => "ok").increment(1);
                tracing::info!(order_no, "stock deducted");
                Ok(())
            }
            Err(e @ InventoryError::InsufficientStock { .. }) => {
                metrics::counter!("inventory_deduct_total", "outcome" => "insufficient").increment(1);
                tracing::info!(order_no, error = %e, "deduct rejected");
                Err(e)
            }
            Err(e) => {
                metrics::counter!("inventory_deduct_total", "outcome" => "error").increment(1);
                tracing::error!(order_no, error = %e, "deduct failed");
                Err(e)
            }
        }
    }

    /// Adds the items back. Unknown SKUs are logged and skipped.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn rollback(&self, order_no: &str, items: &[StockItem]) -> Result<()> {
        let merged = validate(order_no, items)?;

        let skipped = self.repo.rollback(order_no, &merged).await?;
        for sku_id in &skipped {
            tracing::warn!(order_no, sku_id = %sku_id, "rollback skipped unknown SKU");
        }
        metrics::counter!("inventory_rollback_total").increment(1);
        tracing::info!(order_no, skipped = skipped.len(), "stock rolled back");
        Ok(())
    }

    /// Administrative upsert of a SKU's available count.
    #[tracing::instrument(skip(self))]
    pub async fn set_stock(&self, sku_id: &str, available_count: u32) -> Result<Stock> {
        if sku_id.trim().is_empty() {
            return Err(InventoryError::InvalidArgument("sku_id is required".into()));
        }
        if available_count > MAX_QUANTITY {
            return Err(InventoryError::InvalidArgument(format!(
                "available_count exceeds {MAX_QUANTITY}"
            )));
        }
        self.repo.set_stock(sku_id, available_count).await
    }

    pub async fn logs_for_ref(&self, order_no: &str) -> Result<Vec<StockLog>> {
        self.repo.logs_for_ref(order_no).await
    }

    pub async fn net_delta_by_ref(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        self.repo.net_delta_by_ref(since).await
    }
}

/// Checks the request and merges duplicate SKUs. The result is sorted by
/// SKU so concurrent multi-SKU transactions lock rows in the same order.
fn validate(order_no: &str, items: &[StockItem]) -> Result<Vec<StockItem>> {
    if order_no.trim().is_empty() {
        return Err(InventoryError::InvalidArgument("order_no is required".into()));
    }
    if items.is_empty() {
        return Err(InventoryError::InvalidArgument("items must not be empty".into()));
    }

    let mut merged: BTreeMap<&str, u32> = BTreeMap::new();
    for item in items {
        if item.sku_id.trim().is_empty() {
            return Err(InventoryError::InvalidArgument("sku_id is required".into()));
        }
        if item.quantity == 0 {
            return Err(InventoryError::InvalidArgument(format!(
                "quantity for {} must be positive",
                item.sku_id
            )));
        }
        let total = merged.entry(item.sku_id.as_str()).or_default();
        *total = total
            .checked_add(item.quantity)
            .filter(|q| *q <= MAX_QUANTITY)
            .ok_or_else(|| {
                InventoryError::InvalidArgument(format!(
                    "quantity for {} exceeds {MAX_QUANTITY}",
                    item.sku_id
                ))
            })?;
    }

    Ok(merged
        .into_iter()
        .map(|(sku_id, quantity)| StockItem::new(sku_id, quantity))
        .collect())
}
