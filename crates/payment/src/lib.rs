//! Payment core.
//!
//! Creates at most one payment per order, applies channel callbacks exactly
//! once (idempotency key, lock, status check), and records success in a
//! transactional outbox that the dispatcher turns into `payment.succeeded`.

pub mod channel;
pub mod clients;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod signature;
pub mod status;
pub mod sweeper;

pub use channel::{ChannelConfig, ChannelRegistry, Environment, PayParams, PaymentChannel};
pub use clients::{ClientError, InMemoryOrderClient, OrderClient, OrderSnapshot};
pub use error::{PaymentError, Result};
pub use memory::InMemoryPaymentRepository;
pub use model::{
    CallbackOutcome, CallbackRequest, CreatePaymentRequest, CreatePaymentResult, Payment,
    PaymentLog, PaymentLogAction, PaymentToken,
};
pub use postgres::{PAYMENT_OUTBOX_TABLE, PostgresPaymentRepository};
pub use repository::{CallbackUpdate, PaymentRepository};
pub use service::{PaymentService, PaymentSettings};
pub use signature::{AcceptAllVerifier, Sha256Verifier, SignatureVerifier};
pub use status::PaymentStatus;
pub use sweeper::{ExpiredPaymentSweeper, SweeperConfig};
