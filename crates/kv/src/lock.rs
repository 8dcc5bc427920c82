//! Short-lived mutual exclusion over the shared key-value store.

use std::sync::Arc;
use std::time::Duration;

use common::EntityId;

use crate::{KeyValueStore, Result};

const LOCK_PREFIX: &str = "lock:";

/// Proof of a held lock. Release it with [`DistributedLock::release`].
///
/// The token ties the release to this holder, so a lock that expired and was
/// re-acquired by someone else is never deleted by the original holder.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a held lock should be released"]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lock TTLs used by the services.
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Held while one order is created for a user and token.
    pub order_create_ttl: Duration,
    /// Held while a payment is created for an order.
    pub payment_create_ttl: Duration,
    /// Held while one payment callback is applied.
    pub payment_callback_ttl: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            order_create_ttl: Duration::from_secs(10),
            payment_create_ttl: Duration::from_secs(300),
            payment_callback_ttl: Duration::from_secs(30),
        }
    }
}

/// Set-if-absent lock with a TTL.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Tries once to acquire the lock. Returns `None` if someone else holds it.
    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let full_key = format!("{LOCK_PREFIX}{key}");
        let token = EntityId::new().to_string();

        let acquired = match self.store.set_nx(&full_key, &token, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                metrics::counter!("lock_acquire_total", "outcome" => "error").increment(1);
                return Err(e);
            }
        };

        if acquired {
            metrics::counter!("lock_acquire_total", "outcome" => "acquired").increment(1);
            Ok(Some(LockGuard {
                key: full_key,
                token,
            }))
        } else {
            metrics::counter!("lock_acquire_total", "outcome" => "contended").increment(1);
            tracing::debug!(key = %full_key, "lock held elsewhere");
            Ok(None)
        }
    }

    /// Releases a held lock. Returns false if it had already expired.
    ///
    /// Failures are logged rather than returned; the TTL bounds how long a
    /// lock can outlive its holder.
    pub async fn release(&self, guard: LockGuard) -> bool {
        match self.store.delete_if_equals(&guard.key, &guard.token).await {
            Ok(released) => {
                if !released {
                    tracing::warn!(key = %guard.key, "lock expired before release");
                }
                released
            }
            Err(e) => {
                tracing::warn!(key = %guard.key, error = %e, "failed to release lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryKeyValueStore;

    fn lock() -> (DistributedLock, InMemoryKeyValueStore) {
        let store = InMemoryKeyValueStore::new();
        (DistributedLock::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let (lock, _) = lock();
        let ttl = Duration::from_secs(10);
        let guard = lock.try_acquire("order:1", ttl).await.unwrap().unwrap();
        assert_eq!(guard.key(), "lock:order:1");
        assert!(lock.try_acquire("order:1", ttl).await.unwrap().is_none());

        assert!(lock.release(guard).await);
        assert!(lock.try_acquire("order:1", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_holder_cannot_release_new_holder() {
        let (lock, store) = lock();
        let ttl = Duration::from_secs(5);
        let stale = lock.try_acquire("k", ttl).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = lock.try_acquire("k", ttl).await.unwrap().unwrap();

        assert!(!lock.release(stale).await);
        assert!(store.exists("lock:k").await.unwrap());
        assert!(lock.release(fresh).await);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (lock, store) = lock();
        store.set_unavailable(true);
        assert!(lock.try_acquire("k", Duration::from_secs(1)).await.is_err());
    }
}
