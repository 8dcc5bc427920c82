use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{EntityId, MAX_QUANTITY, Money, ProductCatalog, generate_order_no};
use kv::{DistributedLock, EntityCache, KeyValueStore, LockSettings};
use messaging::OrderTimeout;
use outbox::OutboxEntry;

use crate::{
    CartClient, CreateOrderRequest, CreateOrderResult, InventoryClient, NoAdjustments, Order,
    OrderError, OrderItem, OrderPage, OrderRepository, OrderStatus, OrderToken, PriceAdjuster,
    Result, UserDirectory,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAY_CHANNEL: &str = "alipay";

/// Tunables for the order service.
#[derive(Debug, Clone)]
pub struct OrderSettings {
    /// How long an order may stay `PendingPay` before it is closed.
    pub pay_timeout: Duration,
    /// Lifetime of a create-order token.
    pub token_ttl: Duration,
    pub cache_ttl: Duration,
    pub cache_negative_ttl: Duration,
    pub locks: LockSettings,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            pay_timeout: Duration::from_secs(1800),
            token_ttl: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(300),
            cache_negative_ttl: Duration::from_secs(30),
            locks: LockSettings::default(),
        }
    }
}

/// What `mark_paid` did with a payment notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPaidOutcome {
    Paid,
    /// The order had already recorded a payment; nothing changed.
    AlreadyPaid,
    /// The order left `PendingPay` without being paid (cancelled or closed).
    NotPayable(OrderStatus),
}

/// Order lifecycle operations.
#[derive(Clone)]
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryClient>,
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserDirectory>,
    cart: Arc<dyn CartClient>,
    pricing: Arc<dyn PriceAdjuster>,
    kv: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    cache: EntityCache<Order>,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryClient>,
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserDirectory>,
        cart: Arc<dyn CartClient>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_settings(repo, inventory, catalog, users, cart, kv, OrderSettings::default())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_settings(
        repo: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryClient>,
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserDirectory>,
        cart: Arc<dyn CartClient>,
        kv: Arc<dyn KeyValueStore>,
        settings: OrderSettings,
    ) -> Self {
        let cache = EntityCache::new(
            kv.clone(),
            "order",
            settings.cache_ttl,
            settings.cache_negative_ttl,
        );
        Self {
            repo,
            inventory,
            catalog,
            users,
            cart,
            pricing: Arc::new(NoAdjustments),
            lock: DistributedLock::new(kv.clone()),
            kv,
            cache,
            settings,
        }
    }

    /// Replaces the default (no discount, free shipping) pricing.
    pub fn with_pricing(mut self, pricing: Arc<dyn PriceAdjuster>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    fn token_key(user_id: &str, token: &str) -> String {
        format!("order:token:{user_id}:{token}")
    }

    /// Issues a single-use token that `create_order` must present.
    #[tracing::instrument(skip(self))]
    pub async fn generate_order_token(&self, user_id: &str) -> Result<OrderToken> {
        if user_id.trim().is_empty() {
            return Err(OrderError::Validation("user_id is required".into()));
        }
        let token = EntityId::new().to_string();
        self.kv
            .set(
                &Self::token_key(user_id, &token),
                "1",
                Some(self.settings.token_ttl),
            )
            .await?;
        Ok(OrderToken {
            token,
            expires_in_secs: self.settings.token_ttl.as_secs(),
        })
    }

    /// Runs the create-order saga: snapshot, deduct, persist.
    #[tracing::instrument(skip(self, req), fields(user_id = %req.user_id, order_no = tracing::field::Empty))]
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<CreateOrderResult> {
        let started = Instant::now();
        validate_create(&req)?;

        let lock_key = format!("order:idempotent:{}:{}", req.user_id, req.token);
        let Some(guard) = self
            .lock
            .try_acquire(&lock_key, self.settings.locks.order_create_ttl)
            .await?
        else {
            tracing::info!(user_id = %req.user_id, "duplicate submit while order is being created");
            return Err(OrderError::Busy("order is being submitted, retry later".into()));
        };

        let result = self.create_order_locked(&req).await;
        self.lock.release(guard).await;

        match &result {
            Ok(created) => {
                tracing::Span::current().record("order_no", created.order_no.as_str());
                metrics::counter!("orders_created_total").increment(1);
                metrics::histogram!("order_create_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                self.remove_cart_lines(&req).await;
            }
            Err(e) => log_by_kind("create order failed", e),
        }
        result
    }

    async fn create_order_locked(&self, req: &CreateOrderRequest) -> Result<CreateOrderResult> {
        if self
            .kv
            .take(&Self::token_key(&req.user_id, &req.token))
            .await?
            .is_none()
        {
            return Err(OrderError::Validation(
                "order token is invalid or already used".into(),
            ));
        }

        let sku_ids: Vec<String> = req
            .items
            .iter()
            .map(|l| l.sku_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let skus = self.catalog.batch_get_skus(&sku_ids).await?;

        let order_no = generate_order_no(req.order_type);
        let mut items = Vec::with_capacity(req.items.len());
        let mut total = Money::zero();
        for line in &req.items {
            let sku = skus
                .get(&line.sku_id)
                .ok_or_else(|| OrderError::NotFound(format!("sku {}", line.sku_id)))?;
            if !sku.on_sale {
                return Err(OrderError::Validation(format!(
                    "sku {} is not on sale",
                    line.sku_id
                )));
            }
            let subtotal = sku
                .price
                .checked_mul(line.quantity)
                .ok_or_else(out_of_range)?;
            total = total.checked_add(subtotal).ok_or_else(out_of_range)?;
            items.push(OrderItem {
                id: EntityId::new(),
                order_no: order_no.clone(),
                product_id: sku.product_id.clone(),
                sku_id: sku.sku_id.clone(),
                product_title: sku.product_title.clone(),
                product_image: sku.product_image.clone(),
                sku_name: sku.sku_name.clone(),
                unit_price: sku.price,
                quantity: line.quantity,
                subtotal,
            });
        }

        let receiver = self
            .users
            .get_receiver(&req.user_id, &req.address_id)
            .await?;

        let adjustments = self
            .pricing
            .adjust(&req.user_id, req.order_type, total)
            .await?;
        if adjustments.discount.is_negative() || adjustments.shipping.is_negative() {
            return Err(OrderError::Validation(
                "discount and shipping must not be negative".into(),
            ));
        }
        let pay_amount =
            Order::compute_pay_amount(total, adjustments.discount, adjustments.shipping)
                .ok_or_else(out_of_range)?;

        let now = Utc::now();
        let order = Order {
            id: EntityId::new(),
            order_no: order_no.clone(),
            user_id: req.user_id.clone(),
            order_type: req.order_type,
            status: OrderStatus::PendingPay,
            total_amount: total,
            discount_amount: adjustments.discount,
            shipping_amount: adjustments.shipping,
            pay_amount,
            receiver,
            buyer_remark: req.buyer_remark.clone(),
            items,
            pay_channel: None,
            pay_trade_no: None,
            created_at: now,
            paid_at: None,
            shipped_at: None,
            completed_at: None,
            closed_at: None,
            updated_at: now,
            version: 0,
        };
        let timeout = OutboxEntry::for_event(&OrderTimeout {
            order_no: order_no.clone(),
            user_id: order.user_id.clone(),
            created_at: now,
        })?;

        self.inventory
            .deduct(&order_no, &order.stock_items())
            .await?;

        match self.repo.insert(&order, &[timeout]).await {
            Ok(()) => {}
            Err(OrderError::DuplicateOrderNo(no)) => {
                // The reservation already made under this number belongs to
                // the existing order.
                tracing::warn!(order_no = %no, "order number collision");
                return Err(OrderError::RetryClient(
                    "order number collision, please resubmit".into(),
                ));
            }
            Err(e) => {
                self.rollback_inventory(&order, "create_failed").await;
                return Err(e);
            }
        }

        tracing::info!(order_no = %order_no, pay_amount = %order.pay_amount, "order created");
        Ok(CreateOrderResult {
            order_no,
            pay_amount: order.pay_amount,
        })
    }

    async fn remove_cart_lines(&self, req: &CreateOrderRequest) {
        let cart_items: Vec<String> = req
            .items
            .iter()
            .filter_map(|l| l.cart_item_id.clone())
            .collect();
        if cart_items.is_empty() {
            return;
        }
        if let Err(e) = self.cart.remove_items(&req.user_id, &cart_items).await {
            tracing::warn!(user_id = %req.user_id, error = %e, "failed to remove purchased cart lines");
        }
    }

    /// Returns the user's order. Another user's order reads as not found.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: &str, order_no: &str) -> Result<Order> {
        let order = self.find_order(order_no).await?;
        if order.user_id != user_id {
            return Err(OrderError::NotFound(order_no.to_string()));
        }
        Ok(order)
    }

    /// Looks up an order without an ownership check, through the cache.
    pub async fn find_order(&self, order_no: &str) -> Result<Order> {
        if order_no.trim().is_empty() {
            return Err(OrderError::Validation("order_no is required".into()));
        }
        self.cache
            .get_or_load(order_no, || self.repo.get(order_no))
            .await?
            .ok_or_else(|| OrderError::NotFound(order_no.to_string()))
    }

    /// One page of the user's orders. `page` starts at 1.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
        page: u32,
        size: u32,
    ) -> Result<OrderPage> {
        if user_id.trim().is_empty() {
            return Err(OrderError::Validation("user_id is required".into()));
        }
        let page = page.max(1);
        let size = match size {
            0 => DEFAULT_PAGE_SIZE,
            s => s.min(MAX_PAGE_SIZE),
        };
        let offset = (page as u64 - 1) * size as u64;
        let (orders, total) = self
            .repo
            .list_for_user(user_id, status, offset, size)
            .await?;
        Ok(OrderPage {
            orders,
            total,
            page,
            size,
        })
    }

    /// User cancel of an unpaid order. Cancelling twice succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: &str, order_no: &str) -> Result<Order> {
        let order = self.load_fresh(order_no).await?;
        if order.user_id != user_id {
            return Err(OrderError::NotFound(order_no.to_string()));
        }
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let cancelled = match self
            .transition(&order, OrderStatus::Cancelled, "cancel")
            .await
        {
            Ok(cancelled) => cancelled,
            Err(OrderError::StaleState(_)) => {
                let current = self.load_fresh(order_no).await?;
                if current.status == OrderStatus::Cancelled {
                    return Ok(current);
                }
                return Err(OrderError::InvalidTransition {
                    order_no: order_no.to_string(),
                    status: current.status,
                    action: "cancel",
                });
            }
            Err(e) => return Err(e),
        };

        self.rollback_inventory(&cancelled, "cancel").await;
        tracing::info!(order_no, "order cancelled");
        Ok(cancelled)
    }

    /// Closes an unpaid order whose pay window has passed.
    ///
    /// Returns false when there was nothing to do: the order is no longer
    /// pending, is still inside its window, or another actor won the race.
    #[tracing::instrument(skip(self))]
    pub async fn close_expired_order(&self, order_no: &str) -> Result<bool> {
        let order = self.load_fresh(order_no).await?;
        if order.status != OrderStatus::PendingPay {
            return Ok(false);
        }
        let deadline = order.created_at + chrono_duration(self.settings.pay_timeout);
        if Utc::now() < deadline {
            tracing::debug!(order_no, %deadline, "order not yet expired");
            return Ok(false);
        }

        let closed = match self.transition(&order, OrderStatus::Closed, "close").await {
            Ok(closed) => closed,
            Err(OrderError::StaleState(_)) => {
                tracing::debug!(order_no, "order changed before close, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.rollback_inventory(&closed, "timeout_close").await;
        tracing::info!(order_no, "expired order closed");
        Ok(true)
    }

    /// Records a successful payment. Repeated notifications are no-ops.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_no: &str,
        pay_channel: &str,
        pay_trade_no: &str,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<MarkPaidOutcome> {
        if pay_trade_no.trim().is_empty() {
            return Err(OrderError::Validation("pay_trade_no is required".into()));
        }
        let channel = if pay_channel.trim().is_empty() {
            DEFAULT_PAY_CHANNEL
        } else {
            pay_channel
        };
        let paid_at = paid_at.unwrap_or_else(Utc::now);

        let order = self.load_fresh(order_no).await?;
        if let Some(outcome) = self.paid_outcome(&order, pay_trade_no) {
            return Ok(outcome);
        }

        match self
            .repo
            .mark_paid(order_no, order.version, channel, pay_trade_no, paid_at)
            .await
        {
            Ok(()) => {
                self.cache.invalidate(order_no).await;
                metrics::counter!("order_transitions_total", "from" => order.status.as_str(), "to" => OrderStatus::Paid.as_str()).increment(1);
                tracing::info!(order_no, channel, "order paid");
                Ok(MarkPaidOutcome::Paid)
            }
            Err(OrderError::StaleState(_)) => {
                let current = self.load_fresh(order_no).await?;
                match self.paid_outcome(&current, pay_trade_no) {
                    Some(outcome) => Ok(outcome),
                    None => Err(OrderError::StaleState(order_no.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Settles a notification against an order that is not `PendingPay`.
    fn paid_outcome(&self, order: &Order, pay_trade_no: &str) -> Option<MarkPaidOutcome> {
        if order.status.has_been_paid() {
            tracing::debug!(order_no = %order.order_no, "order already paid");
            return Some(MarkPaidOutcome::AlreadyPaid);
        }
        if order.status.can_pay() {
            return None;
        }
        metrics::counter!("operational_alerts_total", "alert" => "payment_on_unpayable_order").increment(1);
        tracing::error!(
            alert = "payment_on_unpayable_order",
            order_no = %order.order_no,
            status = %order.status,
            pay_trade_no,
            "payment succeeded for an order that can no longer be paid"
        );
        Some(MarkPaidOutcome::NotPayable(order.status))
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, order_no: &str) -> Result<Order> {
        let order = self.load_fresh(order_no).await?;
        self.transition(&order, OrderStatus::Shipped, "ship").await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_no: &str) -> Result<Order> {
        let order = self.load_fresh(order_no).await?;
        self.transition(&order, OrderStatus::Completed, "complete")
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_refund(&self, user_id: &str, order_no: &str) -> Result<Order> {
        let order = self.load_fresh(order_no).await?;
        if order.user_id != user_id {
            return Err(OrderError::NotFound(order_no.to_string()));
        }
        self.transition(&order, OrderStatus::Refunding, "request refund")
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm_refund(&self, order_no: &str) -> Result<Order> {
        let order = self.load_fresh(order_no).await?;
        self.transition(&order, OrderStatus::Refunded, "confirm refund")
            .await
    }

    /// Pending-pay orders whose pay window has passed, oldest first.
    pub async fn expired_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let cutoff = Utc::now() - chrono_duration(self.settings.pay_timeout);
        self.repo.find_expired_pending(cutoff, limit).await
    }

    /// Reads straight from the repository; transitions need the current version.
    async fn load_fresh(&self, order_no: &str) -> Result<Order> {
        if order_no.trim().is_empty() {
            return Err(OrderError::Validation("order_no is required".into()));
        }
        self.repo
            .get(order_no)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_no.to_string()))
    }

    async fn transition(
        &self,
        order: &Order,
        to: OrderStatus,
        action: &'static str,
    ) -> Result<Order> {
        if !order.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                order_no: order.order_no.clone(),
                status: order.status,
                action,
            });
        }

        let at = Utc::now();
        self.repo
            .transition(&order.order_no, order.status, to, order.version, at)
            .await?;
        self.cache.invalidate(&order.order_no).await;
        metrics::counter!("order_transitions_total", "from" => order.status.as_str(), "to" => to.as_str()).increment(1);

        let mut updated = order.clone();
        updated.apply_transition(to, at);
        Ok(updated)
    }

    /// Returns the order's reservation. Failure raises an alert; the caller's
    /// outcome is unchanged.
    async fn rollback_inventory(&self, order: &Order, reason: &'static str) {
        if let Err(e) = self
            .inventory
            .rollback(&order.order_no, &order.stock_items())
            .await
        {
            metrics::counter!("operational_alerts_total", "alert" => "inventory_rollback_failed").increment(1);
            tracing::error!(
                alert = "inventory_rollback_failed",
                order_no = %order.order_no,
                reason,
                error = %e,
                "inventory rollback failed, reservation leaked"
            );
        }
    }
}

fn validate_create(req: &CreateOrderRequest) -> Result<()> {
    if req.user_id.trim().is_empty() {
        return Err(OrderError::Validation("user_id is required".into()));
    }
    if req.token.trim().is_empty() {
        return Err(OrderError::Validation("order token is required".into()));
    }
    if req.address_id.trim().is_empty() {
        return Err(OrderError::Validation("address_id is required".into()));
    }
    if req.items.is_empty() {
        return Err(OrderError::Validation("order must contain items".into()));
    }
    for line in &req.items {
        if line.sku_id.trim().is_empty() {
            return Err(OrderError::Validation("sku_id is required".into()));
        }
        if line.quantity == 0 || line.quantity > MAX_QUANTITY {
            return Err(OrderError::Validation(format!(
                "quantity for {} must be between 1 and {MAX_QUANTITY}",
                line.sku_id
            )));
        }
    }
    Ok(())
}

fn out_of_range() -> OrderError {
    OrderError::Validation("order amount is out of range".into())
}

pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn log_by_kind(msg: &str, e: &OrderError) {
    use common::ErrorKind;
    match e.kind() {
        ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::StaleState => {
            tracing::debug!(error = %e, "{msg}")
        }
        ErrorKind::Busy | ErrorKind::InsufficientStock | ErrorKind::RetryClient | ErrorKind::Conflict => {
            tracing::info!(error = %e, "{msg}")
        }
        ErrorKind::Upstream => tracing::warn!(error = %e, "{msg}"),
        ErrorKind::Internal => tracing::error!(error = %e, "{msg}"),
    }
}
