//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// ```text
/// PendingPay ──► Paid ──► Shipped ──► Completed
///   │   │         │
///   │   │         └──► Refunding ──► Refunded
///   │   └──► Closed      (timeout)
///   └──► Cancelled       (user)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Awaiting payment; stock is reserved.
    #[default]
    PendingPay,
    Paid,
    Shipped,
    /// Terminal success.
    Completed,
    /// Cancelled by the user before payment.
    Cancelled,
    Refunding,
    Refunded,
    /// Closed by the timeout reaper.
    Closed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::PendingPay,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunding,
        OrderStatus::Refunded,
        OrderStatus::Closed,
    ];

    /// Stored column value.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::PendingPay => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Completed => 4,
            OrderStatus::Cancelled => 5,
            OrderStatus::Refunding => 6,
            OrderStatus::Refunded => 7,
            OrderStatus::Closed => 8,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::PendingPay)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::PendingPay)
    }

    pub fn can_close(&self) -> bool {
        matches!(self, OrderStatus::PendingPay)
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Shipped)
    }

    pub fn can_request_refund(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_confirm_refund(&self) -> bool {
        matches!(self, OrderStatus::Refunding)
    }

    /// True if `next` is reachable from this status in one step.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match next {
            OrderStatus::PendingPay => false,
            OrderStatus::Paid => self.can_pay(),
            OrderStatus::Shipped => self.can_ship(),
            OrderStatus::Completed => self.can_complete(),
            OrderStatus::Cancelled => self.can_cancel(),
            OrderStatus::Refunding => self.can_request_refund(),
            OrderStatus::Refunded => self.can_confirm_refund(),
            OrderStatus::Closed => self.can_close(),
        }
    }

    /// True once payment has been recorded; `pay_trade_no` and `paid_at`
    /// are set exactly in these states.
    pub fn has_been_paid(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Shipped
                | OrderStatus::Completed
                | OrderStatus::Refunding
                | OrderStatus::Refunded
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
                | OrderStatus::Closed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPay => "PendingPay",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunding => "Refunding",
            OrderStatus::Refunded => "Refunded",
            OrderStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
