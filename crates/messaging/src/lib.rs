//! At-least-once messaging between services.
//!
//! - [`Message`]: the wire envelope (`event_type`, `aggregate_id`, JSON payload, timestamp)
//! - [`schema`]: the closed, versioned set of payloads per channel
//! - [`MessageBroker`]: publish / delayed publish / subscribe, ordered per partition key
//! - [`consumer`]: the retrying consumer loop every subscriber runs
//!
//! Consumers must be idempotent: a message may be delivered more than once.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod schema;

pub use broker::{MessageBroker, Subscription};
pub use consumer::{ConsumerConfig, HandlerError, MessageHandler, process_pending, run_consumer};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
pub use message::{Message, MessageBuilder};
pub use schema::{CartEvent, CartLine, EventSchema, OrderTimeout, PaymentSucceeded, topics};
