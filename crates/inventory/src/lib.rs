//! Inventory core.
//!
//! Stock is deducted with a conditional update (`available_count >= qty`)
//! inside one local transaction per request, so concurrent purchases can
//! never oversell. Every change appends a [`StockLog`] row tagged with the
//! caller's correlation id (the order number).

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod service;

pub use error::{InventoryError, Result};
pub use memory::InMemoryStockRepository;
pub use model::{Stock, StockChangeReason, StockItem, StockLog};
pub use postgres::PostgresStockRepository;
pub use repository::StockRepository;
pub use service::InventoryService;
