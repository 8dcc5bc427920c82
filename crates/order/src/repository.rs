use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox::OutboxEntry;

use crate::{Order, OrderStatus, Result};

/// Persistence for orders and their items.
///
/// Every status change is a conditional update on `(order_no, status, version)`.
/// A miss reports [`crate::OrderError::StaleState`].
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists the order, its items and the given outbox rows atomically.
    ///
    /// A taken order number reports [`crate::OrderError::DuplicateOrderNo`].
    async fn insert(&self, order: &Order, outbox: &[OutboxEntry]) -> Result<()>;

    async fn get(&self, order_no: &str) -> Result<Option<Order>>;

    /// One page of a user's orders, newest first, plus the total count.
    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Order>, u64)>;

    /// Moves `order_no` from `from` to `to` if its version is still `expected_version`.
    async fn transition(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// `PendingPay -> Paid`, writing the channel, trade number and paid time.
    async fn mark_paid(
        &self,
        order_no: &str,
        expected_version: i64,
        channel: &str,
        trade_no: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Pending-pay orders created before `created_before`, oldest first.
    async fn find_expired_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>>;
}
