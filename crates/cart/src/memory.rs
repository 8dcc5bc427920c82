use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{CartError, CartItem, CartStore, Result};

/// In-memory durable cart store.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    items: Arc<RwLock<HashMap<String, CartItem>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes fail with `Unavailable`.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.items.read().await.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(CartError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn upsert(&self, item: &CartItem) -> Result<()> {
        self.check_writable()?;
        let mut items = self.items.write().await;
        match items.get(&item.id.to_string()) {
            Some(existing) if existing.updated_at > item.updated_at => {}
            _ => {
                items.insert(item.id.to_string(), item.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, item_id: &str) -> Result<bool> {
        self.check_writable()?;
        let mut items = self.items.write().await;
        match items.get(item_id) {
            Some(existing) if existing.user_id == user_id => Ok(items.remove(item_id).is_some()),
            _ => Ok(false),
        }
    }

    async fn clear(&self, user_id: &str) -> Result<u64> {
        self.check_writable()?;
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| item.user_id != user_id);
        Ok((before - items.len()) as u64)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<CartItem>> {
        let items = self.items.read().await;
        let mut lines: Vec<CartItem> = items
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::{EntityId, Money};

    fn item(user: &str) -> CartItem {
        let now = Utc::now();
        CartItem {
            id: EntityId::new(),
            user_id: user.into(),
            product_id: "P".into(),
            sku_id: "S".into(),
            product_title: "Widget".into(),
            product_image: String::new(),
            sku_name: "Blue".into(),
            unit_price: Money::from_cents(100),
            current_price: Money::from_cents(100),
            quantity: 1,
            stock_hint: 5,
            is_valid: true,
            invalid_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_older_update_does_not_overwrite() {
        let store = InMemoryCartStore::new();
        let mut line = item("u1");
        line.quantity = 3;
        store.upsert(&line).await.unwrap();

        let mut stale = line.clone();
        stale.quantity = 1;
        stale.updated_at = line.updated_at - Duration::seconds(5);
        store.upsert(&stale).await.unwrap();

        let lines = store.list("u1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_delete_scoped_to_owner() {
        let store = InMemoryCartStore::new();
        let line = item("u1");
        store.upsert(&line).await.unwrap();

        assert!(!store.delete("u2", &line.id.to_string()).await.unwrap());
        assert!(store.delete("u1", &line.id.to_string()).await.unwrap());
        assert!(!store.delete("u1", &line.id.to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_only_touches_user() {
        let store = InMemoryCartStore::new();
        store.upsert(&item("u1")).await.unwrap();
        store.upsert(&item("u1")).await.unwrap();
        store.upsert(&item("u2")).await.unwrap();

        assert_eq!(store.clear("u1").await.unwrap(), 2);
        assert_eq!(store.count().await, 1);
    }
}
