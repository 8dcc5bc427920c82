use common::ErrorKind;
use thiserror::Error;

/// Errors returned by the inventory core.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A SKU did not have enough available stock. Nothing was deducted.
    #[error("Insufficient stock for SKU {sku_id}")]
    InsufficientStock { sku_id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("SKU not found: {0}")]
    NotFound(String),

    #[error("Corrupt stock row: {0}")]
    Corrupt(String),

    /// The store refused the operation.
    #[error("Inventory store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            InventoryError::InvalidArgument(_) => ErrorKind::Validation,
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::Corrupt(_)
            | InventoryError::Unavailable(_)
            | InventoryError::Database(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;
