use async_trait::async_trait;
use common::EntityId;

use crate::{OutboxEntry, Result};

/// Storage contract for one service's outbox table.
///
/// Implementations must be thread-safe and return rows in insertion order.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts a standalone entry. Services normally insert inside their own
    /// domain transaction instead.
    async fn insert(&self, entry: OutboxEntry) -> Result<()>;

    /// Oldest pending entries, up to `limit`.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Oldest failed entries whose retry count is still below `max_retries`.
    async fn fetch_retryable(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEntry>>;

    async fn mark_sent(&self, id: EntityId) -> Result<()>;

    /// Records a failed send and returns the new retry count.
    async fn mark_failed(&self, id: EntityId, error: &str) -> Result<u32>;

    /// Every entry written for an aggregate, oldest first.
    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEntry>>;
}
