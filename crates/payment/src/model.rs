use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use serde::{Deserialize, Serialize};

use crate::{PayParams, PaymentChannel, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: EntityId,
    pub payment_no: String,
    pub order_no: String,
    pub user_id: String,
    pub amount: Money,
    pub channel: PaymentChannel,
    pub status: PaymentStatus,
    /// Channel-side transaction number, set by the callback.
    pub trade_no: Option<String>,
    pub notify_url: String,
    pub return_url: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentLogAction {
    Create,
    Callback,
    StatusChange,
    Close,
    Query,
}

impl PaymentLogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentLogAction::Create => "create",
            PaymentLogAction::Callback => "callback",
            PaymentLogAction::StatusChange => "status_change",
            PaymentLogAction::Close => "close",
            PaymentLogAction::Query => "query",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(PaymentLogAction::Create),
            "callback" => Some(PaymentLogAction::Callback),
            "status_change" => Some(PaymentLogAction::StatusChange),
            "close" => Some(PaymentLogAction::Close),
            "query" => Some(PaymentLogAction::Query),
            _ => None,
        }
    }
}

/// Audit row for every payment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLog {
    pub id: EntityId,
    pub payment_no: String,
    pub action: PaymentLogAction,
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentLog {
    pub fn new(
        payment_no: &str,
        action: PaymentLogAction,
        from_status: Option<PaymentStatus>,
        to_status: PaymentStatus,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            payment_no: payment_no.to_string(),
            action,
            from_status,
            to_status,
            remark: remark.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: String,
    pub order_no: String,
    pub token: String,
    pub channel: PaymentChannel,
    #[serde(default)]
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentResult {
    pub payment: Payment,
    pub pay_params: PayParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    pub token: String,
    pub expires_in_secs: u64,
}

/// A channel's asynchronous notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub payment_no: String,
    pub channel: String,
    pub trade_no: String,
    /// Decimal amount as sent by the channel, e.g. `"20.00"`.
    pub amount: String,
    pub status: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Succeeded,
    /// The channel reported a failed payment.
    Failed,
    /// This notification was already applied.
    AlreadyProcessed,
}
