use chrono::{DateTime, Utc};
use common::{EntityId, Money, OrderType};
use inventory::StockItem;
use serde::{Deserialize, Serialize};

use crate::OrderStatus;

/// Delivery address captured when the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub phone: String,
    pub province: String,
    pub city: String,
    pub district: String,
    pub detail: String,
}

impl Receiver {
    pub fn full_address(&self) -> String {
        format!(
            "{}{}{}{}",
            self.province, self.city, self.district, self.detail
        )
    }
}

/// One purchased SKU. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: EntityId,
    pub order_no: String,
    pub product_id: String,
    pub sku_id: String,
    pub product_title: String,
    pub product_image: String,
    pub sku_name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub subtotal: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: EntityId,
    pub order_no: String,
    pub user_id: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub shipping_amount: Money,
    pub pay_amount: Money,
    pub receiver: Receiver,
    pub buyer_remark: String,
    pub items: Vec<OrderItem>,
    pub pay_channel: Option<String>,
    pub pay_trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the order is cancelled or closed.
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Order {
    /// `max(0, total - discount + shipping)`, or `None` if the sum leaves
    /// the representable range.
    pub fn compute_pay_amount(total: Money, discount: Money, shipping: Money) -> Option<Money> {
        total
            .checked_sub(discount)?
            .checked_add(shipping)
            .map(Money::non_negative)
    }

    /// Applies a status transition in memory, bumping the version and
    /// stamping the matching lifecycle timestamp.
    pub fn apply_transition(&mut self, to: OrderStatus, at: DateTime<Utc>) {
        self.status = to;
        self.version += 1;
        self.updated_at = at;
        match to {
            OrderStatus::Paid => self.paid_at = Some(at),
            OrderStatus::Shipped => self.shipped_at = Some(at),
            OrderStatus::Completed => self.completed_at = Some(at),
            OrderStatus::Cancelled | OrderStatus::Closed => self.closed_at = Some(at),
            _ => {}
        }
    }

    /// `PendingPay -> Paid` together with the payment fields.
    pub fn apply_paid(&mut self, channel: &str, trade_no: &str, paid_at: DateTime<Utc>) {
        self.apply_transition(OrderStatus::Paid, paid_at);
        self.pay_channel = Some(channel.to_string());
        self.pay_trade_no = Some(trade_no.to_string());
    }

    /// The inventory lines this order reserved.
    pub fn stock_items(&self) -> Vec<StockItem> {
        self.items
            .iter()
            .map(|i| StockItem::new(i.sku_id.clone(), i.quantity))
            .collect()
    }
}

/// One line of a create-order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub sku_id: String,
    pub quantity: u32,
    /// Cart line to remove once the order exists.
    #[serde(default)]
    pub cart_item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub token: String,
    pub items: Vec<OrderLineRequest>,
    pub address_id: String,
    #[serde(default)]
    pub buyer_remark: String,
    #[serde(default)]
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderResult {
    pub order_no: String,
    pub pay_amount: Money,
}

/// Single-use token that guards order creation against double submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToken {
    pub token: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}
