//! Business numbers for orders and payments.
//!
//! Layout: two-digit type prefix, `YYYYMMDDHHmm` (UTC), six random digits,
//! and a two-digit `00` suffix. The time prefix keeps numbers range-queryable;
//! uniqueness is left to the database's unique index.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const ORDER_NORMAL_PREFIX: &str = "01";
pub const ORDER_SECKILL_PREFIX: &str = "02";
pub const PAYMENT_PREFIX: &str = "10";

/// Kind of order, encoded in the order number prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Normal,
    Seckill,
}

impl OrderType {
    pub fn prefix(&self) -> &'static str {
        match self {
            OrderType::Normal => ORDER_NORMAL_PREFIX,
            OrderType::Seckill => ORDER_SECKILL_PREFIX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Normal => "normal",
            OrderType::Seckill => "seckill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(OrderType::Normal),
            "seckill" => Some(OrderType::Seckill),
            _ => None,
        }
    }
}

/// Generates a new order number.
pub fn generate_order_no(order_type: OrderType) -> String {
    business_no(order_type.prefix(), Utc::now())
}

/// Generates a new payment number.
pub fn generate_payment_no() -> String {
    business_no(PAYMENT_PREFIX, Utc::now())
}

fn business_no(prefix: &str, at: DateTime<Utc>) -> String {
    let tail: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{prefix}{}{tail:06}00", at.format("%Y%m%d%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_no_layout() {
        let no = generate_order_no(OrderType::Normal);
        assert_eq!(no.len(), 22);
        assert!(no.starts_with("01"));
        assert!(no.ends_with("00"));
        assert!(no.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_seckill_prefix() {
        assert!(generate_order_no(OrderType::Seckill).starts_with("02"));
    }

    #[test]
    fn test_payment_no_prefix_differs_from_orders() {
        let no = generate_payment_no();
        assert!(no.starts_with("10"));
        assert_eq!(no.len(), 22);
    }

    #[test]
    fn test_time_segment() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 0).unwrap();
        let no = business_no("01", at);
        assert_eq!(&no[2..14], "202503070905");
    }
}
