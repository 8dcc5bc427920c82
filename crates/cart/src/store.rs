use async_trait::async_trait;

use crate::{CartItem, Result};

/// Durable copy of every cart, fed by the projector.
///
/// Writes are idempotent so replayed events converge on the same rows.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Inserts or replaces a line. An older `updated_at` never overwrites a
    /// newer row.
    async fn upsert(&self, item: &CartItem) -> Result<()>;

    /// Returns false when the line was already gone.
    async fn delete(&self, user_id: &str, item_id: &str) -> Result<bool>;

    /// Removes every line of the user. Returns how many were removed.
    async fn clear(&self, user_id: &str) -> Result<u64>;

    /// Lines of the user, oldest first.
    async fn list(&self, user_id: &str) -> Result<Vec<CartItem>>;
}
