use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox::{InMemoryOutboxStore, OutboxEntry, OutboxStore};
use tokio::sync::RwLock;

use crate::{Order, OrderError, OrderRepository, OrderStatus, Result};

/// In-memory order repository.
///
/// Owns an [`InMemoryOutboxStore`] so that order inserts and their outbox rows
/// land together under one write lock.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    outbox: InMemoryOutboxStore,
    fail_on_write: Arc<AtomicBool>,
    duplicate_on_insert: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbox written alongside orders; hand it to the dispatcher.
    pub fn outbox(&self) -> InMemoryOutboxStore {
        self.outbox.clone()
    }

    /// Makes inserts and transitions fail with `Unavailable`.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Makes the next inserts report a duplicate order number.
    pub fn set_duplicate_on_insert(&self, duplicate: bool) {
        self.duplicate_on_insert.store(duplicate, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(OrderError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }

    fn conditional_update<F>(
        orders: &mut HashMap<String, Order>,
        order_no: &str,
        from: OrderStatus,
        expected_version: i64,
        apply: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Order),
    {
        match orders.get_mut(order_no) {
            Some(order) if order.status == from && order.version == expected_version => {
                apply(order);
                Ok(())
            }
            _ => Err(OrderError::StaleState(order_no.to_string())),
        }
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order, outbox: &[OutboxEntry]) -> Result<()> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;

        if self.duplicate_on_insert.load(Ordering::SeqCst)
            || orders.contains_key(&order.order_no)
        {
            return Err(OrderError::DuplicateOrderNo(order.order_no.clone()));
        }
        for entry in outbox {
            self.outbox.insert(entry.clone()).await?;
        }
        orders.insert(order.order_no.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, order_no: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_no).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Order>, u64)> {
        let orders = self.orders.read().await;
        let mut matching: Vec<&Order> = orders
            .values()
            .filter(|o| o.user_id == user_id && status.is_none_or(|s| o.status == s))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_no.cmp(&a.order_no))
        });

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn transition(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        Self::conditional_update(&mut orders, order_no, from, expected_version, |order| {
            order.apply_transition(to, at)
        })
    }

    async fn mark_paid(
        &self,
        order_no: &str,
        expected_version: i64,
        channel: &str,
        trade_no: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        Self::conditional_update(
            &mut orders,
            order_no,
            OrderStatus::PendingPay,
            expected_version,
            |order| order.apply_paid(channel, trade_no, paid_at),
        )
    }

    async fn find_expired_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut expired: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::PendingPay && o.created_at < created_before)
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        expired.truncate(limit);
        Ok(expired)
    }
}
