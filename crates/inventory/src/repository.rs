use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Result, Stock, StockItem, StockLog};

/// Storage contract for stock and its log.
///
/// `deduct` and `rollback` receive validated, merged items sorted by SKU.
#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn get(&self, sku_id: &str) -> Result<Option<Stock>>;

    /// Missing SKUs are absent from the map.
    async fn batch_get(&self, sku_ids: &[String]) -> Result<HashMap<String, Stock>>;

    /// Deducts every item or none. Fails with `InsufficientStock` naming the
    /// first SKU whose conditional update matched no row.
    async fn deduct(&self, ref_id: &str, items: &[StockItem]) -> Result<()>;

    /// Adds every item back and returns the SKUs that did not exist.
    async fn rollback(&self, ref_id: &str, items: &[StockItem]) -> Result<Vec<String>>;

    /// Creates or overwrites a SKU's available count.
    async fn set_stock(&self, sku_id: &str, available_count: u32) -> Result<Stock>;

    /// Log rows for one correlation id, oldest first.
    async fn logs_for_ref(&self, ref_id: &str) -> Result<Vec<StockLog>>;

    /// Net delta per correlation id, for ids with any log row since `since`.
    async fn net_delta_by_ref(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>>;
}
