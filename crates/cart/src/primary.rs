//! Per-user cart hash in the key-value store.

use std::sync::Arc;
use std::time::Duration;

use kv::KeyValueStore;

use crate::{CartItem, Result};

const CART_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// `cart:user:{user_id}` maps item id to the line's JSON. Every write
/// refreshes the key's 30-day TTL.
///
/// `cart:user:{user_id}:live` is written with the same TTL ahead of every
/// mutation, so an empty hash next to a live marker means the user emptied
/// the cart rather than the copy being evicted.
#[derive(Clone)]
pub struct PrimaryCartStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PrimaryCartStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(user_id: &str) -> String {
        format!("cart:user:{user_id}")
    }

    fn marker_key(user_id: &str) -> String {
        format!("cart:user:{user_id}:live")
    }

    async fn touch(&self, user_id: &str) -> Result<()> {
        self.kv
            .set(&Self::marker_key(user_id), "1", Some(CART_TTL))
            .await?;
        Ok(())
    }

    /// Whether the hash is authoritative even when empty.
    pub async fn is_live(&self, user_id: &str) -> Result<bool> {
        Ok(self.kv.exists(&Self::marker_key(user_id)).await?)
    }

    pub async fn put(&self, item: &CartItem) -> Result<()> {
        self.put_all(&item.user_id, std::slice::from_ref(item)).await
    }

    /// Writes several lines in one round trip.
    pub async fn put_all(&self, user_id: &str, items: &[CartItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let fields = items
            .iter()
            .map(|item| Ok((item.id.to_string(), serde_json::to_string(item)?)))
            .collect::<Result<Vec<_>>>()?;
        self.touch(user_id).await?;
        self.kv
            .hash_set(&Self::key(user_id), &fields, Some(CART_TTL))
            .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<CartItem>> {
        let Some(raw) = self.kv.hash_get(&Self::key(user_id), item_id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Every line, oldest first. Undecodable entries are skipped.
    pub async fn list(&self, user_id: &str) -> Result<Vec<CartItem>> {
        let raw = self.kv.hash_get_all(&Self::key(user_id)).await?;
        let mut items: Vec<CartItem> = raw
            .into_iter()
            .filter_map(|(item_id, json)| match serde_json::from_str(&json) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(user_id, item_id, error = %e, "skipping undecodable cart line");
                    None
                }
            })
            .collect();
        items.sort_by(|a: &CartItem, b: &CartItem| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    /// Deletes lines in one round trip. Returns how many existed.
    pub async fn remove(&self, user_id: &str, item_ids: &[String]) -> Result<usize> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        self.touch(user_id).await?;
        Ok(self.kv.hash_delete(&Self::key(user_id), item_ids).await?)
    }

    pub async fn clear(&self, user_id: &str) -> Result<()> {
        self.touch(user_id).await?;
        self.kv.delete(&Self::key(user_id)).await?;
        Ok(())
    }
}
