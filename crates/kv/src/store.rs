use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Core trait for the shared key-value store.
///
/// Semantics follow Redis: string keys with optional TTL, plus hash keys.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes a string value only if the key is absent.
    ///
    /// Returns true if the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes a key of any type. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes a string key only if it currently holds `expected`.
    ///
    /// The comparison and delete are atomic.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Atomically reads and deletes a string value.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Returns true if the key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Writes hash fields and, if given, refreshes the key's TTL in the same step.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Reads one hash field.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Reads every field of a hash. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Deletes hash fields in one round trip. Returns the number removed.
    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<usize>;
}
