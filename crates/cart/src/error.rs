use common::{CatalogError, ErrorKind};
use inventory::InventoryError;
use kv::KvError;
use messaging::BrokerError;
use thiserror::Error;

/// Errors returned by the cart core.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("{0}")]
    Validation(String),

    #[error("Cart item not found: {0}")]
    NotFound(String),

    #[error("Only {available} of SKU {sku_id} available, {requested} requested")]
    InsufficientStock {
        sku_id: String,
        available: u32,
        requested: u32,
    },

    #[error("Corrupt cart row: {0}")]
    Corrupt(String),

    #[error("Cart store unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CartError::Validation(_) => ErrorKind::Validation,
            CartError::NotFound(_) => ErrorKind::NotFound,
            CartError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CartError::Catalog(e) => e.kind(),
            CartError::Inventory(e) => e.kind(),
            CartError::Broker(e) => e.kind(),
            CartError::Corrupt(_)
            | CartError::Unavailable(_)
            | CartError::Kv(_)
            | CartError::Database(_)
            | CartError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CartError>;
