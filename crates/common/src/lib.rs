//! Shared building blocks for the commerce services.
//!
//! Identifiers, money, business-number generation, the error-kind taxonomy
//! used at every service boundary, the response envelope, and the product
//! catalog contract consumed by both the order and cart services.

pub mod catalog;
pub mod envelope;
pub mod error;
pub mod id;
pub mod money;
pub mod number;

pub use catalog::{CatalogError, InMemoryProductCatalog, ProductCatalog, SkuSnapshot};
pub use envelope::Envelope;
pub use error::ErrorKind;
pub use id::{EntityId, ParseEntityIdError};
pub use money::{Money, ParseMoneyError};
pub use number::{OrderType, generate_order_no, generate_payment_no};

/// Largest quantity accepted on a single line. Stock columns are `INTEGER`.
pub const MAX_QUANTITY: u32 = i32::MAX as u32;
