use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::EntityId;
use tokio::sync::RwLock;

use crate::{OutboxEntry, OutboxError, OutboxStatus, OutboxStore, Result};

/// In-memory outbox for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    entries: Arc<RwLock<Vec<OutboxEntry>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes inserts and status updates fail.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Every entry, in insertion order.
    pub async fn all(&self) -> Vec<OutboxEntry> {
        self.entries.read().await.clone()
    }

    pub async fn count_by_status(&self, status: OutboxStatus) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.status == status)
            .count()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(OutboxError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, entry: OutboxEntry) -> Result<()> {
        self.check_writable()?;
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_retryable(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed && e.retry_count < max_retries)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: EntityId) -> Result<()> {
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        entry.status = OutboxStatus::Sent;
        entry.error_msg = None;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: EntityId, error: &str) -> Result<u32> {
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        entry.status = OutboxStatus::Failed;
        entry.retry_count += 1;
        entry.error_msg = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(entry.retry_count)
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }
}
