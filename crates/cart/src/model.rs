use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use messaging::CartLine;
use serde::{Deserialize, Serialize};

/// One line of a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: EntityId,
    pub user_id: String,
    pub product_id: String,
    pub sku_id: String,
    pub product_title: String,
    pub product_image: String,
    pub sku_name: String,
    /// Price when the line was added.
    pub unit_price: Money,
    /// Latest catalog price seen by a refresh.
    pub current_price: Money,
    pub quantity: u32,
    pub stock_hint: u32,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn subtotal(&self) -> Money {
        self.current_price.multiply(self.quantity)
    }

    pub fn invalidate(&mut self, reason: InvalidReason) {
        self.is_valid = false;
        self.invalid_reason = Some(reason.to_string());
    }

    pub fn to_line(&self) -> CartLine {
        CartLine {
            id: self.id,
            user_id: self.user_id.clone(),
            product_id: self.product_id.clone(),
            sku_id: self.sku_id.clone(),
            product_title: self.product_title.clone(),
            product_image: self.product_image.clone(),
            sku_name: self.sku_name.clone(),
            unit_price: self.unit_price,
            current_price: self.current_price,
            quantity: self.quantity,
            stock_hint: self.stock_hint,
            is_valid: self.is_valid,
            invalid_reason: self.invalid_reason.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<CartLine> for CartItem {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.id,
            user_id: line.user_id,
            product_id: line.product_id,
            sku_id: line.sku_id,
            product_title: line.product_title,
            product_image: line.product_image,
            sku_name: line.sku_name,
            unit_price: line.unit_price,
            current_price: line.current_price,
            quantity: line.quantity,
            stock_hint: line.stock_hint,
            is_valid: line.is_valid,
            invalid_reason: line.invalid_reason,
            created_at: line.created_at,
            updated_at: line.updated_at,
        }
    }
}

/// Why a refresh marked a line unpurchasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    ProductUnavailable,
    SkuMissing,
    OutOfStock,
    ExceedsStock { available: u32 },
    StockUnknown,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::ProductUnavailable => f.write_str("product is missing or delisted"),
            InvalidReason::SkuMissing => f.write_str("sku is missing"),
            InvalidReason::OutOfStock => f.write_str("out of stock"),
            InvalidReason::ExceedsStock { available } => {
                write!(f, "quantity exceeds stock, {available} available")
            }
            InvalidReason::StockUnknown => f.write_str("stock unavailable, try again later"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    /// Number of valid lines.
    pub item_count: usize,
    pub invalid_count: usize,
    /// Units across valid lines.
    pub total_quantity: u32,
    pub total_price: Money,
}

impl CartSummary {
    pub fn of(items: &[CartItem]) -> Self {
        items.iter().fold(Self::default(), |mut summary, item| {
            if item.is_valid {
                summary.item_count += 1;
                summary.total_quantity += item.quantity;
                summary.total_price += item.subtotal();
            } else {
                summary.invalid_count += 1;
            }
            summary
        })
    }
}

/// Re-priced selection ready for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutPreview {
    pub items: Vec<CartItem>,
    pub product_total: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub final_amount: Money,
}
