//! Shared key-value substrate.
//!
//! The [`KeyValueStore`] trait is the seam over the cache/lock store shared by
//! every service. [`DistributedLock`] and [`EntityCache`] are policies built
//! on top of it.

pub mod cache;
pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use cache::EntityCache;
pub use error::{KvError, Result};
pub use lock::{DistributedLock, LockGuard, LockSettings};
pub use memory::InMemoryKeyValueStore;
pub use redis_store::RedisKeyValueStore;
pub use store::KeyValueStore;
