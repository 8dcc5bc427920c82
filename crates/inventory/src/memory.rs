use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    InventoryError, Result, Stock, StockChangeReason, StockItem, StockLog, StockRepository,
};

#[derive(Debug, Default)]
struct State {
    stock: HashMap<String, Stock>,
    logs: Vec<StockLog>,
}

/// In-memory stock repository for tests and single-process runs.
///
/// A single write lock makes each deduct all-or-nothing, matching the
/// transactional Postgres implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockRepository {
    state: Arc<RwLock<State>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes deduct, rollback and set_stock fail with `Unavailable`.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Every log row, oldest first.
    pub async fn all_logs(&self) -> Vec<StockLog> {
        self.state.read().await.logs.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn get(&self, sku_id: &str) -> Result<Option<Stock>> {
        Ok(self.state.read().await.stock.get(sku_id).cloned())
    }

    async fn batch_get(&self, sku_ids: &[String]) -> Result<HashMap<String, Stock>> {
        let state = self.state.read().await;
        Ok(sku_ids
            .iter()
            .filter_map(|id| state.stock.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn deduct(&self, ref_id: &str, items: &[StockItem]) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        for item in items {
            item.signed_quantity()?;
            let enough = state
                .stock
                .get(&item.sku_id)
                .is_some_and(|s| s.available_count >= item.quantity);
            if !enough {
                return Err(InventoryError::InsufficientStock {
                    sku_id: item.sku_id.clone(),
                });
            }
        }

        let now = Utc::now();
        for item in items {
            let delta = item.signed_quantity()?;
            if let Some(stock) = state.stock.get_mut(&item.sku_id) {
                stock.available_count -= item.quantity;
                stock.version += 1;
                stock.updated_at = now;
            }
            state.logs.push(StockLog::new(
                &item.sku_id,
                -delta,
                StockChangeReason::Deduct,
                ref_id,
            ));
        }
        Ok(())
    }

    async fn rollback(&self, ref_id: &str, items: &[StockItem]) -> Result<Vec<String>> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut skipped = Vec::new();
        for item in items {
            item.signed_quantity()?;
        }

        for item in items {
            let delta = item.signed_quantity()?;
            match state.stock.get_mut(&item.sku_id) {
                Some(stock) => {
                    stock.available_count = stock.available_count.saturating_add(item.quantity);
                    stock.version += 1;
                    stock.updated_at = now;
                }
                None => {
                    skipped.push(item.sku_id.clone());
                    continue;
                }
            }
            state.logs.push(StockLog::new(
                &item.sku_id,
                delta,
                StockChangeReason::Rollback,
                ref_id,
            ));
        }
        Ok(skipped)
    }

    async fn set_stock(&self, sku_id: &str, available_count: u32) -> Result<Stock> {
        self.check_writable()?;
        StockItem::new(sku_id, available_count).signed_quantity()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        let stock = state
            .stock
            .entry(sku_id.to_string())
            .and_modify(|s| {
                s.available_count = available_count;
                s.version += 1;
                s.updated_at = now;
            })
            .or_insert_with(|| Stock {
                sku_id: sku_id.to_string(),
                available_count,
                version: 0,
                updated_at: now,
            });
        Ok(stock.clone())
    }

    async fn logs_for_ref(&self, ref_id: &str) -> Result<Vec<StockLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.ref_id == ref_id)
            .cloned()
            .collect())
    }

    async fn net_delta_by_ref(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let state = self.state.read().await;
        let mut totals: HashMap<String, i64> = HashMap::new();
        for log in &state.logs {
            *totals.entry(log.ref_id.clone()).or_default() += log.delta as i64;
        }
        let recent: std::collections::HashSet<&str> = state
            .logs
            .iter()
            .filter(|l| l.created_at >= since)
            .map(|l| l.ref_id.as_str())
            .collect();
        totals.retain(|ref_id, _| recent.contains(ref_id.as_str()));
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deduct_all_or_nothing() {
        let repo = InMemoryStockRepository::new();
        repo.set_stock("A", 5).await.unwrap();
        repo.set_stock("B", 1).await.unwrap();

        let err = repo
            .deduct("o1", &[StockItem::new("A", 2), StockItem::new("B", 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { ref sku_id } if sku_id == "B"));
        assert_eq!(repo.get("A").await.unwrap().unwrap().available_count, 5);
        assert!(repo.all_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_deduct_bumps_version_and_logs() {
        let repo = InMemoryStockRepository::new();
        repo.set_stock("A", 5).await.unwrap();
        repo.deduct("o1", &[StockItem::new("A", 2)]).await.unwrap();

        let stock = repo.get("A").await.unwrap().unwrap();
        assert_eq!(stock.available_count, 3);
        assert_eq!(stock.version, 1);

        let logs = repo.logs_for_ref("o1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].delta, -2);
        assert_eq!(logs[0].reason, StockChangeReason::Deduct);
    }

    #[tokio::test]
    async fn test_missing_sku_is_insufficient() {
        let repo = InMemoryStockRepository::new();
        let err = repo
            .deduct("o1", &[StockItem::new("nope", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn test_rollback_skips_missing() {
        let repo = InMemoryStockRepository::new();
        repo.set_stock("A", 0).await.unwrap();
        let skipped = repo
            .rollback("o1", &[StockItem::new("A", 2), StockItem::new("gone", 1)])
            .await
            .unwrap();
        assert_eq!(skipped, vec!["gone".to_string()]);
        assert_eq!(repo.get("A").await.unwrap().unwrap().available_count, 2);
        assert_eq!(repo.logs_for_ref("o1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_net_delta_by_ref() {
        let repo = InMemoryStockRepository::new();
        repo.set_stock("A", 10).await.unwrap();
        let before = Utc::now();
        repo.deduct("o1", &[StockItem::new("A", 2)]).await.unwrap();
        repo.deduct("o2", &[StockItem::new("A", 3)]).await.unwrap();
        repo.rollback("o2", &[StockItem::new("A", 3)]).await.unwrap();

        let net = repo.net_delta_by_ref(before).await.unwrap();
        assert_eq!(net.get("o1"), Some(&-2));
        assert_eq!(net.get("o2"), Some(&0));
    }
}
