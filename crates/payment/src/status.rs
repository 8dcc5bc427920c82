use serde::{Deserialize, Serialize};

/// The state of a payment.
///
/// ```text
/// Pending ──► Processing ──► Success
///    │            │      └──► Failed ──► Success (late success)
///    └────────────┴──► Closed  (expired)
/// ```
///
/// `Refunded` is stored but nothing transitions into it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
    Closed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Closed,
        PaymentStatus::Refunded,
    ];

    pub fn code(&self) -> i16 {
        match self {
            PaymentStatus::Pending => 1,
            PaymentStatus::Processing => 2,
            PaymentStatus::Success => 3,
            PaymentStatus::Failed => 4,
            PaymentStatus::Closed => 5,
            PaymentStatus::Refunded => 6,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Still waiting for the channel.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// A channel callback may still change this payment.
    ///
    /// Closed and failed payments accept a late success: the channel has
    /// already taken the money.
    pub fn accepts_callback(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending
                | PaymentStatus::Processing
                | PaymentStatus::Failed
                | PaymentStatus::Closed
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match next {
            PaymentStatus::Pending => false,
            PaymentStatus::Processing => *self == PaymentStatus::Pending,
            PaymentStatus::Success | PaymentStatus::Failed => self.accepts_callback(),
            PaymentStatus::Closed => self.is_open(),
            PaymentStatus::Refunded => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Processing => "Processing",
            PaymentStatus::Success => "Success",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Closed => "Closed",
            PaymentStatus::Refunded => "Refunded",
        }
    }

    /// Maps a channel status token. Only `success`/`SUCCESS` means paid.
    pub fn from_callback_token(token: &str) -> Self {
        match token {
            "success" | "SUCCESS" => PaymentStatus::Success,
            _ => PaymentStatus::Failed,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in PaymentStatus::ALL {
            assert_eq!(PaymentStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(PaymentStatus::from_code(0), None);
        assert_eq!(PaymentStatus::Success.code(), 3);
    }

    #[test]
    fn test_transition_matrix() {
        use PaymentStatus::*;
        let allowed = [
            (Pending, Processing),
            (Pending, Success),
            (Pending, Failed),
            (Pending, Closed),
            (Processing, Success),
            (Processing, Failed),
            (Processing, Closed),
            (Failed, Success),
            (Failed, Failed),
            (Closed, Success),
            (Closed, Failed),
        ];
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_refunded_is_unreachable() {
        assert!(
            PaymentStatus::ALL
                .iter()
                .all(|s| !s.can_transition_to(PaymentStatus::Refunded))
        );
    }

    #[test]
    fn test_callback_tokens() {
        assert_eq!(PaymentStatus::from_callback_token("success"), PaymentStatus::Success);
        assert_eq!(PaymentStatus::from_callback_token("SUCCESS"), PaymentStatus::Success);
        assert_eq!(PaymentStatus::from_callback_token("Success"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_callback_token("closed"), PaymentStatus::Failed);
    }
}
