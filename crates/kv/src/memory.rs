use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{KeyValueStore, KvError, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory key-value store for tests and single-process deployments.
///
/// Expiry uses `tokio::time::Instant`, so tests running with a paused clock
/// can advance past TTLs deterministically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with [`KvError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the remaining TTL of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable);
        }
        Ok(())
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    purge_expired(entries, key, now);
    entries.get_mut(key)
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let existed = live_entry(&mut entries, key, Instant::now()).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let matches = matches!(
            live_entry(&mut entries, key, Instant::now()),
            Some(Entry { value: Value::Str(s), .. }) if s == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, Instant::now());
        match entries.remove(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(other) => {
                entries.insert(key.to_string(), other);
                Err(KvError::WrongType(key.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, Instant::now()).is_some())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        purge_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let Value::Hash(map) = &mut entry.value else {
            return Err(KvError::WrongType(key.to_string()));
        };
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.get(field).cloned()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.clone()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let removed = match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => fields.iter().filter(|f| map.remove(*f).is_some()).count(),
            Some(_) => return Err(KvError::WrongType(key.to_string())),
            None => 0,
        };
        // Redis drops a hash once its last field is gone.
        if matches!(entries.get(key), Some(Entry { value: Value::Hash(map), .. }) if map.is_empty())
        {
            entries.remove(key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryKeyValueStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.exists("k").await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_live_and_expired_keys() {
        let store = InMemoryKeyValueStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_nx("lock", "a", ttl).await.unwrap());
        assert!(!store.set_nx("lock", "b", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.set_nx("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", "token-1", None).await.unwrap();
        assert!(!store.delete_if_equals("k", "token-2").await.unwrap());
        assert!(store.delete_if_equals("k", "token-1").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = InMemoryKeyValueStore::new();
        store.set("token", "1", None).await.unwrap();
        assert_eq!(store.take("token").await.unwrap().as_deref(), Some("1"));
        assert!(store.take("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryKeyValueStore::new();
        store
            .hash_set(
                "h",
                &[("a".into(), "1".into()), ("b".into(), "2".into())],
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(store.hash_get("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.hash_get_all("h").await.unwrap().len(), 2);
        assert!(store.ttl("h").await.is_some());

        let removed = store
            .hash_delete("h", &["a".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        store.hash_delete("h", &["b".into()]).await.unwrap();
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(matches!(
            store.hash_get("k", "f").await,
            Err(KvError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_toggle() {
        let store = InMemoryKeyValueStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.get("k").await, Err(KvError::Unavailable)));
        store.set_unavailable(false);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
