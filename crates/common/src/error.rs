//! Error-kind taxonomy shared by every service.
//!
//! Each crate keeps its own error enum; `kind()` on those enums maps onto
//! this closed set, which is what the transport boundary turns into codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing field, bad format, rule violation in the request.
    Validation,
    /// Order, payment, stock or cart line absent.
    NotFound,
    /// Deduction precondition failed.
    InsufficientStock,
    /// Optimistic update affected no rows.
    StaleState,
    /// Lock not acquired or request already in flight.
    Busy,
    /// Unique-index violation.
    Conflict,
    /// The client should retry with a fresh request.
    RetryClient,
    /// A peer service failed.
    Upstream,
    /// Anything unexpected.
    Internal,
}

impl ErrorKind {
    /// Business code carried in the response envelope. Zero is success.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::Validation => 40000,
            ErrorKind::NotFound => 40400,
            ErrorKind::Conflict => 40900,
            ErrorKind::InsufficientStock => 40901,
            ErrorKind::StaleState => 40902,
            ErrorKind::RetryClient => 40903,
            ErrorKind::Busy => 42900,
            ErrorKind::Internal => 50000,
            ErrorKind::Upstream => 50200,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::StaleState => "stale_state",
            ErrorKind::Busy => "busy",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RetryClient => "retry_client",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
        }
    }

    /// Returns true if the message may be shown to the caller verbatim.
    pub fn is_user_safe(&self) -> bool {
        !matches!(self, ErrorKind::Internal | ErrorKind::Upstream)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
