//! Cart core.
//!
//! Lines live in a per-user key-value hash for fast reads and writes. Every
//! mutation is published on the cart channel, partitioned by user, and the
//! [`CartProjector`] replays those events into the durable store. Reads fall
//! back to the durable store on a miss and backfill the hash.

pub mod clients;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod primary;
pub mod projector;
pub mod service;
pub mod store;

pub use clients::StockReader;
pub use error::{CartError, Result};
pub use memory::InMemoryCartStore;
pub use model::{CartItem, CartSummary, CheckoutPreview, InvalidReason};
pub use postgres::PostgresCartStore;
pub use primary::PrimaryCartStore;
pub use projector::CartProjector;
pub use service::CartService;
pub use store::CartStore;
