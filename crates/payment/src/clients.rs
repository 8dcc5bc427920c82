//! Collaborators the payment core calls out to.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ErrorKind, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a peer service.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("peer unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotFound(_) => ErrorKind::NotFound,
            ClientError::Unavailable(_) => ErrorKind::Upstream,
        }
    }
}

/// The slice of an order the payment core needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_no: String,
    pub user_id: String,
    pub is_pending_pay: bool,
    pub pay_amount: Money,
}

/// Reads orders from the order service.
#[async_trait]
pub trait OrderClient: Send + Sync {
    async fn get_order(&self, order_no: &str) -> Result<Option<OrderSnapshot>, ClientError>;
}

#[derive(Debug, Default)]
struct OrderBook {
    orders: HashMap<String, OrderSnapshot>,
    fail_on_lookup: bool,
}

/// In-memory order lookups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderClient {
    state: Arc<RwLock<OrderBook>>,
}

impl InMemoryOrderClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, order: OrderSnapshot) {
        if let Ok(mut state) = self.state.write() {
            state.orders.insert(order.order_no.clone(), order);
        }
    }

    /// Adds a pending order.
    pub fn add_pending(&self, order_no: &str, user_id: &str, pay_amount: Money) {
        self.upsert(OrderSnapshot {
            order_no: order_no.to_string(),
            user_id: user_id.to_string(),
            is_pending_pay: true,
            pay_amount,
        });
    }

    pub fn set_fail_on_lookup(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_lookup = fail;
        }
    }
}

#[async_trait]
impl OrderClient for InMemoryOrderClient {
    async fn get_order(&self, order_no: &str) -> Result<Option<OrderSnapshot>, ClientError> {
        let state = self
            .state
            .read()
            .map_err(|_| ClientError::Unavailable("order book poisoned".into()))?;
        if state.fail_on_lookup {
            return Err(ClientError::Unavailable("order service".into()));
        }
        Ok(state.orders.get(order_no).cloned())
    }
}
