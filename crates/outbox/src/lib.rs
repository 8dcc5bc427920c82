//! Transactional outbox.
//!
//! A service writes an [`OutboxEntry`] in the same local transaction as the
//! state change it describes. The [`OutboxDispatcher`] later drains pending
//! rows into the broker. Delivery is at-least-once; consumers correlate on
//! the entry id and aggregate.

pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher, Route};
pub use entry::{OutboxEntry, OutboxEntryBuilder, OutboxStatus};
pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::OutboxStore;
