use common::{EntityId, ErrorKind};
use messaging::BrokerError;
use thiserror::Error;

/// Errors that can occur when interacting with an outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The outbox row does not exist.
    #[error("Outbox entry not found: {0}")]
    NotFound(EntityId),

    /// A stored row could not be decoded.
    #[error("Corrupt outbox row: {0}")]
    Corrupt(String),

    /// The store refused the operation.
    #[error("Outbox store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl OutboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::NotFound(_) => ErrorKind::NotFound,
            OutboxError::Broker(e) => e.kind(),
            _ => ErrorKind::Internal,
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
