use common::ErrorKind;
use thiserror::Error;

/// Errors raised by key-value store operations.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store refused the operation (used by the in-memory store's failure toggle).
    #[error("Key-value store unavailable")]
    Unavailable,

    /// The key exists but holds a different data type.
    #[error("Wrong type for key {0}")]
    WrongType(String),
}

impl KvError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
