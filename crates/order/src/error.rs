use common::{CatalogError, ErrorKind};
use inventory::InventoryError;
use kv::KvError;
use outbox::OutboxError;
use thiserror::Error;

use crate::OrderStatus;
use crate::clients::ClientError;

/// Errors returned by the order core.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    /// The order is in a state that does not allow the action.
    #[error("Order {order_no} cannot {action} while {status}")]
    InvalidTransition {
        order_no: String,
        status: OrderStatus,
        action: &'static str,
    },

    /// The conditional update matched no row: someone else transitioned first.
    #[error("Order {0} was modified concurrently")]
    StaleState(String),

    #[error("Duplicate order number: {0}")]
    DuplicateOrderNo(String),

    /// A lock or token guard is held by another request.
    #[error("{0}")]
    Busy(String),

    /// The request should be resubmitted with a fresh token.
    #[error("{0}")]
    RetryClient(String),

    #[error("Corrupt order row: {0}")]
    Corrupt(String),

    /// The store refused the operation.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Collaborator error: {0}")]
    Client(#[from] ClientError),

    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) => ErrorKind::Validation,
            OrderError::NotFound(_) => ErrorKind::NotFound,
            OrderError::InvalidTransition { .. } | OrderError::DuplicateOrderNo(_) => {
                ErrorKind::Conflict
            }
            OrderError::StaleState(_) => ErrorKind::StaleState,
            OrderError::Busy(_) => ErrorKind::Busy,
            OrderError::RetryClient(_) => ErrorKind::RetryClient,
            OrderError::Inventory(e) => e.kind(),
            OrderError::Catalog(e) => e.kind(),
            OrderError::Client(e) => e.kind(),
            OrderError::Corrupt(_)
            | OrderError::Unavailable(_)
            | OrderError::Kv(_)
            | OrderError::Outbox(_)
            | OrderError::Database(_)
            | OrderError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;
