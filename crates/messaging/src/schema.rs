//! Published event schemas.
//!
//! Each channel carries a small closed set of payload types. A payload type
//! declares its current schema version; decoders accept that version and
//! older ones. No dynamic payload fields.

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Topic names shared by producers and consumers.
pub mod topics {
    /// Cart mutations, partitioned by user id.
    pub const CART_SYNC: &str = "cart-sync";
    /// Payment success, from the payment dispatcher to the order consumer.
    pub const PAYMENT_SUCCESS_NOTIFY: &str = "payment.success.notify";
    /// Delayed order-timeout notifications for the reaper.
    pub const ORDER_TIMEOUT_DLQ: &str = "order.timeout.dlq";
}

/// A typed payload that can travel in a [`crate::Message`].
pub trait EventSchema: Serialize + DeserializeOwned {
    /// Current schema version written by this build.
    const VERSION: u16;

    /// Every `event_type` this payload type can decode.
    const EVENT_TYPES: &'static [&'static str];

    /// The `event_type` of this particular value.
    fn event_type(&self) -> &'static str;

    fn aggregate_id(&self) -> String;

    /// Key that orders delivery. Defaults to the aggregate id.
    fn partition_key(&self) -> String {
        self.aggregate_id()
    }
}

/// Emitted by the payment service once a payment succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub payment_no: String,
    pub order_no: String,
    pub user_id: String,
    pub amount: Money,
    pub channel: String,
    pub trade_no: String,
    pub paid_at: DateTime<Utc>,
}

impl PaymentSucceeded {
    pub const EVENT_TYPE: &'static str = "payment.succeeded";
}

impl EventSchema for PaymentSucceeded {
    const VERSION: u16 = 1;
    const EVENT_TYPES: &'static [&'static str] = &[Self::EVENT_TYPE];

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn aggregate_id(&self) -> String {
        self.payment_no.clone()
    }

    /// Ordered per order, so a late retry never overtakes a newer event.
    fn partition_key(&self) -> String {
        self.order_no.clone()
    }
}

/// Scheduled by the order service when an order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimeout {
    pub order_no: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl OrderTimeout {
    pub const EVENT_TYPE: &'static str = "order.timeout";
}

impl EventSchema for OrderTimeout {
    const VERSION: u16 = 1;
    const EVENT_TYPES: &'static [&'static str] = &[Self::EVENT_TYPE];

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn aggregate_id(&self) -> String {
        self.order_no.clone()
    }
}

/// A cart line as published on the cart channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: EntityId,
    pub user_id: String,
    pub product_id: String,
    pub sku_id: String,
    pub product_title: String,
    pub product_image: String,
    pub sku_name: String,
    /// Price when the line was added.
    pub unit_price: Money,
    /// Latest known catalog price.
    pub current_price: Money,
    pub quantity: u32,
    /// Available stock when the line was last checked.
    pub stock_hint: u32,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cart mutations, in the order the user made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded { line: CartLine },
    ItemUpdated { line: CartLine },
    ItemRemoved { user_id: String, item_id: EntityId },
    Cleared { user_id: String },
}

impl CartEvent {
    pub const ITEM_ADDED: &'static str = "cart.item.added";
    pub const ITEM_UPDATED: &'static str = "cart.item.updated";
    pub const ITEM_REMOVED: &'static str = "cart.item.removed";
    pub const CLEARED: &'static str = "cart.cleared";

    pub fn user_id(&self) -> &str {
        match self {
            CartEvent::ItemAdded { line } | CartEvent::ItemUpdated { line } => &line.user_id,
            CartEvent::ItemRemoved { user_id, .. } | CartEvent::Cleared { user_id } => user_id,
        }
    }
}

impl EventSchema for CartEvent {
    const VERSION: u16 = 1;
    const EVENT_TYPES: &'static [&'static str] = &[
        Self::ITEM_ADDED,
        Self::ITEM_UPDATED,
        Self::ITEM_REMOVED,
        Self::CLEARED,
    ];

    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::ItemAdded { .. } => Self::ITEM_ADDED,
            CartEvent::ItemUpdated { .. } => Self::ITEM_UPDATED,
            CartEvent::ItemRemoved { .. } => Self::ITEM_REMOVED,
            CartEvent::Cleared { .. } => Self::CLEARED,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            CartEvent::ItemAdded { line } | CartEvent::ItemUpdated { line } => line.id.to_string(),
            CartEvent::ItemRemoved { item_id, .. } => item_id.to_string(),
            CartEvent::Cleared { user_id } => user_id.clone(),
        }
    }

    /// Per-user ordering.
    fn partition_key(&self) -> String {
        self.user_id().to_string()
    }
}
