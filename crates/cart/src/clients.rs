//! Stock lookups the cart uses for quantity bounds and hints.

use std::collections::HashMap;

use async_trait::async_trait;
use inventory::{InventoryError, InventoryService};

#[async_trait]
pub trait StockReader: Send + Sync {
    /// Available count per SKU. Unknown SKUs are omitted.
    async fn available(&self, sku_ids: &[String]) -> Result<HashMap<String, u32>, InventoryError>;
}

#[async_trait]
impl StockReader for InventoryService {
    async fn available(&self, sku_ids: &[String]) -> Result<HashMap<String, u32>, InventoryError> {
        Ok(self
            .batch_get_stock(sku_ids)
            .await?
            .into_iter()
            .map(|(sku_id, stock)| (sku_id, stock.available_count))
            .collect())
    }
}
