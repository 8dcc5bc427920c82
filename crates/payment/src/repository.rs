use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox::OutboxEntry;

use crate::{Payment, PaymentLog, PaymentStatus, Result};

/// A callback's conditional status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUpdate {
    pub payment_no: String,
    pub expected_version: i64,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub trade_no: String,
    /// Set only when `to` is `Success`.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Persistence for payments and their audit log.
///
/// Status changes are conditional on `(payment_no, status, version)`; a miss
/// reports [`crate::PaymentError::StaleState`].
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persists a new payment with its creation log.
    ///
    /// A taken payment number, or a second open payment for the same order,
    /// reports [`crate::PaymentError::DuplicatePayment`].
    async fn insert(&self, payment: &Payment, log: &PaymentLog) -> Result<()>;

    async fn get(&self, payment_no: &str) -> Result<Option<Payment>>;

    /// The most recent payment for an order.
    async fn find_by_order(&self, order_no: &str) -> Result<Option<Payment>>;

    async fn find_by_trade_no(&self, trade_no: &str) -> Result<Option<Payment>>;

    /// Applies a callback, its log row and (on success) the outbox row in one
    /// transaction.
    async fn apply_callback(
        &self,
        update: &CallbackUpdate,
        log: &PaymentLog,
        outbox: Option<&OutboxEntry>,
    ) -> Result<()>;

    /// Moves an open payment to `Closed`.
    async fn close(
        &self,
        payment_no: &str,
        expected_version: i64,
        at: DateTime<Utc>,
        log: &PaymentLog,
    ) -> Result<()>;

    /// Open payments whose `expired_at` is before `now`, oldest first.
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Payment>>;

    async fn append_log(&self, log: &PaymentLog) -> Result<()>;

    /// Audit rows for a payment in write order.
    async fn logs_for(&self, payment_no: &str) -> Result<Vec<PaymentLog>>;
}
