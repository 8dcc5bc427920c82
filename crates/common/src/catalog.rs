//! Product catalog contract.
//!
//! The catalog itself is an external collaborator; order and cart only read
//! SKU snapshots from it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ErrorKind, Money};

/// Point-in-time view of a sellable SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuSnapshot {
    pub product_id: String,
    pub sku_id: String,
    pub product_title: String,
    pub product_image: String,
    pub sku_name: String,
    pub price: Money,
    /// False when the owning product is delisted.
    pub on_sale: bool,
}

/// Failure talking to the catalog.
#[derive(Debug, Clone, Error)]
#[error("catalog unavailable: {0}")]
pub struct CatalogError(pub String);

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Upstream
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Looks up a single SKU. `None` means the SKU does not exist.
    async fn get_sku(&self, sku_id: &str) -> Result<Option<SkuSnapshot>, CatalogError>;

    /// Looks up several SKUs; absent ones are omitted from the map.
    async fn batch_get_skus(
        &self,
        sku_ids: &[String],
    ) -> Result<HashMap<String, SkuSnapshot>, CatalogError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    skus: HashMap<String, SkuSnapshot>,
    fail_on_lookup: bool,
}

/// In-memory catalog for tests and the single-process deployment.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a SKU.
    pub fn upsert(&self, sku: SkuSnapshot) {
        if let Ok(mut state) = self.state.write() {
            state.skus.insert(sku.sku_id.clone(), sku);
        }
    }

    /// Convenience for tests: an on-sale SKU with generated product fields.
    pub fn add_sku(&self, sku_id: &str, name: &str, price: Money) {
        self.upsert(SkuSnapshot {
            product_id: format!("P-{sku_id}"),
            sku_id: sku_id.to_string(),
            product_title: name.to_string(),
            product_image: String::new(),
            sku_name: name.to_string(),
            price,
            on_sale: true,
        });
    }

    pub fn remove(&self, sku_id: &str) {
        if let Ok(mut state) = self.state.write() {
            state.skus.remove(sku_id);
        }
    }

    /// Configures the catalog to fail every lookup.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_lookup = fail;
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, InMemoryCatalogState>, CatalogError> {
        let state = self
            .state
            .read()
            .map_err(|_| CatalogError("catalog state poisoned".to_string()))?;
        if state.fail_on_lookup {
            return Err(CatalogError("catalog lookup failed".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn get_sku(&self, sku_id: &str) -> Result<Option<SkuSnapshot>, CatalogError> {
        Ok(self.read()?.skus.get(sku_id).cloned())
    }

    async fn batch_get_skus(
        &self,
        sku_ids: &[String],
    ) -> Result<HashMap<String, SkuSnapshot>, CatalogError> {
        let state = self.read()?;
        Ok(sku_ids
            .iter()
            .filter_map(|id| state.skus.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_batch() {
        let catalog = InMemoryProductCatalog::new();
        catalog.add_sku("SKU-A", "Widget", Money::from_cents(1000));
        catalog.add_sku("SKU-B", "Gadget", Money::from_cents(2500));

        let sku = catalog.get_sku("SKU-A").await.unwrap().unwrap();
        assert_eq!(sku.price.cents(), 1000);
        assert!(catalog.get_sku("SKU-X").await.unwrap().is_none());

        let found = catalog
            .batch_get_skus(&["SKU-A".to_string(), "SKU-X".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("SKU-A"));
    }

    #[tokio::test]
    async fn test_fail_on_lookup() {
        let catalog = InMemoryProductCatalog::new();
        catalog.set_fail_on_lookup(true);
        let err = catalog.get_sku("SKU-A").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }
}
