use common::ErrorKind;
use kv::KvError;
use outbox::OutboxError;
use thiserror::Error;

use crate::PaymentStatus;
use crate::clients::ClientError;

/// Errors returned by the payment core.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),

    #[error("Payment not found: {0}")]
    NotFound(String),

    /// A lock or idempotency guard is held by another request.
    #[error("{0}")]
    Busy(String),

    #[error("Order {0} cannot be paid")]
    OrderNotPayable(String),

    /// The order already has a payment past `Pending`.
    #[error("Order {order_no} already has a {status} payment")]
    AlreadyPaidOrClosed {
        order_no: String,
        status: PaymentStatus,
    },

    #[error("Duplicate payment: {0}")]
    DuplicatePayment(String),

    /// The channel trade number is already attached to another payment.
    #[error("Trade number {0} is already in use")]
    TradeNoInUse(String),

    #[error("Callback signature is invalid")]
    InvalidSignature,

    #[error("Callback amount {callback} does not match payment amount {expected}")]
    AmountMismatch { expected: String, callback: String },

    /// A replay of a callback that was already rejected.
    #[error("Callback was rejected earlier: {0}")]
    CallbackRejected(String),

    /// The conditional update matched no row.
    #[error("Payment {0} was modified concurrently")]
    StaleState(String),

    #[error("Corrupt payment row: {0}")]
    Corrupt(String),

    #[error("Payment store unavailable: {0}")]
    Unavailable(String),

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

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Validation(_)
            | PaymentError::InvalidSignature
            | PaymentError::AmountMismatch { .. }
            | PaymentError::CallbackRejected(_) => ErrorKind::Validation,
            PaymentError::NotFound(_) => ErrorKind::NotFound,
            PaymentError::Busy(_) => ErrorKind::Busy,
            PaymentError::OrderNotPayable(_)
            | PaymentError::AlreadyPaidOrClosed { .. }
            | PaymentError::DuplicatePayment(_)
            | PaymentError::TradeNoInUse(_) => ErrorKind::Conflict,
            PaymentError::StaleState(_) => ErrorKind::StaleState,
            PaymentError::Client(e) => e.kind(),
            PaymentError::Corrupt(_)
            | PaymentError::Unavailable(_)
            | PaymentError::Kv(_)
            | PaymentError::Outbox(_)
            | PaymentError::Database(_)
            | PaymentError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Rejections that replaying the same callback can never fix. Only
    /// raised once the signature has been verified, so an unsigned request
    /// can never pin a rejection on a genuine notification.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::Validation(_)
                | PaymentError::AmountMismatch { .. }
                | PaymentError::TradeNoInUse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
