//! Per-entity caching policy.
//!
//! Read-through on miss, a short negative TTL for absent entities, and
//! invalidation on every write. Cache failures never fail the caller: reads
//! fall through to the loader and invalidations are logged.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::KeyValueStore;

const ABSENT_MARKER: &str = "\u{0}absent";

pub struct EntityCache<T> {
    store: Arc<dyn KeyValueStore>,
    namespace: &'static str,
    ttl: Duration,
    negative_ttl: Duration,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace,
            ttl: self.ttl,
            negative_ttl: self.negative_ttl,
            _entity: PhantomData,
        }
    }
}

impl<T> EntityCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        namespace: &'static str,
        ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            store,
            namespace,
            ttl,
            negative_ttl,
            _entity: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("cache:{}:{id}", self.namespace)
    }

    /// Returns the cached entity, or runs `load` and caches its outcome.
    pub async fn get_or_load<F, Fut, E>(&self, id: &str, load: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = self.key(id);
        match self.store.get(&key).await {
            Ok(Some(raw)) if raw == ABSENT_MARKER => {
                metrics::counter!("entity_cache_total", "namespace" => self.namespace, "outcome" => "negative_hit").increment(1);
                return Ok(None);
            }
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(entity) => {
                    metrics::counter!("entity_cache_total", "namespace" => self.namespace, "outcome" => "hit").increment(1);
                    return Ok(Some(entity));
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "dropping undecodable cache entry");
                    self.invalidate(id).await;
                }
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(%key, error = %e, "cache read failed, loading from source"),
        }

        metrics::counter!("entity_cache_total", "namespace" => self.namespace, "outcome" => "miss").increment(1);
        let loaded = load().await?;

        let write = match &loaded {
            Some(entity) => match serde_json::to_string(entity) {
                Ok(raw) => self.store.set(&key, &raw, Some(self.ttl)).await,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "entity not cacheable");
                    Ok(())
                }
            },
            None => {
                self.store
                    .set(&key, ABSENT_MARKER, Some(self.negative_ttl))
                    .await
            }
        };
        if let Err(e) = write {
            tracing::warn!(%key, error = %e, "cache fill failed");
        }

        Ok(loaded)
    }

    /// Drops the cached entry after a write to the entity.
    pub async fn invalidate(&self, id: &str) {
        let key = self.key(id);
        if let Err(e) = self.store.delete(&key).await {
            tracing::warn!(%key, error = %e, "cache invalidation failed");
        }
    }
}
