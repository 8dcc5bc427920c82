use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::{InventoryError, Result};

/// Available stock for one SKU. Every mutation bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub sku_id: String,
    pub available_count: u32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One line of a deduct or rollback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub sku_id: String,
    pub quantity: u32,
}

impl StockItem {
    pub fn new(sku_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
        }
    }

    /// Quantity as the signed type of the stock columns and log deltas.
    pub fn signed_quantity(&self) -> Result<i32> {
        i32::try_from(self.quantity).map_err(|_| {
            InventoryError::InvalidArgument(format!(
                "quantity for {} is out of range",
                self.sku_id
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockChangeReason {
    Deduct,
    Rollback,
}

impl StockChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockChangeReason::Deduct => "deduct",
            StockChangeReason::Rollback => "rollback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deduct" => Some(StockChangeReason::Deduct),
            "rollback" => Some(StockChangeReason::Rollback),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit of stock changes. `delta` is negative for deductions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLog {
    pub id: EntityId,
    pub sku_id: String,
    pub delta: i32,
    pub reason: StockChangeReason,
    /// Correlation id of the caller, the order number.
    pub ref_id: String,
    pub created_at: DateTime<Utc>,
}

impl StockLog {
    pub fn new(sku_id: &str, delta: i32, reason: StockChangeReason, ref_id: &str) -> Self {
        Self {
            id: EntityId::new(),
            sku_id: sku_id.to_string(),
            delta,
            reason,
            ref_id: ref_id.to_string(),
            created_at: Utc::now(),
        }
    }
}
