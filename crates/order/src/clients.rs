//! Collaborators the order core calls out to.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ErrorKind, Money, OrderType};
use inventory::{InventoryError, InventoryService, StockItem, StockLog};
use thiserror::Error;

use crate::Receiver;

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

/// Resolves a user's delivery address.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_receiver(&self, user_id: &str, address_id: &str) -> Result<Receiver, ClientError>;
}

/// The inventory operations the saga and reconciler depend on.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn deduct(&self, order_no: &str, items: &[StockItem]) -> Result<(), InventoryError>;

    async fn rollback(&self, order_no: &str, items: &[StockItem]) -> Result<(), InventoryError>;

    async fn logs_for_ref(&self, order_no: &str) -> Result<Vec<StockLog>, InventoryError>;

    async fn net_delta_by_ref(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>, InventoryError>;
}

#[async_trait]
impl InventoryClient for InventoryService {
    async fn deduct(&self, order_no: &str, items: &[StockItem]) -> Result<(), InventoryError> {
        InventoryService::deduct(self, order_no, items).await
    }

    async fn rollback(&self, order_no: &str, items: &[StockItem]) -> Result<(), InventoryError> {
        InventoryService::rollback(self, order_no, items).await
    }

    async fn logs_for_ref(&self, order_no: &str) -> Result<Vec<StockLog>, InventoryError> {
        InventoryService::logs_for_ref(self, order_no).await
    }

    async fn net_delta_by_ref(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>, InventoryError> {
        InventoryService::net_delta_by_ref(self, since).await
    }
}

/// Removes purchased lines from the user's cart.
#[async_trait]
pub trait CartClient: Send + Sync {
    async fn remove_items(&self, user_id: &str, item_ids: &[String]) -> Result<(), ClientError>;
}

/// Server-side price adjustments for a new order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adjustments {
    pub discount: Money,
    pub shipping: Money,
}

/// Decides discount and shipping for an order. Clients never supply them.
#[async_trait]
pub trait PriceAdjuster: Send + Sync {
    async fn adjust(
        &self,
        user_id: &str,
        order_type: OrderType,
        total: Money,
    ) -> Result<Adjustments, ClientError>;
}

/// No promotions and free shipping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdjustments;

#[async_trait]
impl PriceAdjuster for NoAdjustments {
    async fn adjust(
        &self,
        _user_id: &str,
        _order_type: OrderType,
        _total: Money,
    ) -> Result<Adjustments, ClientError> {
        Ok(Adjustments::default())
    }
}

/// Returns whatever adjustments were last configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceAdjuster {
    state: Arc<RwLock<Adjustments>>,
}

impl InMemoryPriceAdjuster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, adjustments: Adjustments) {
        if let Ok(mut state) = self.state.write() {
            *state = adjustments;
        }
    }
}

#[async_trait]
impl PriceAdjuster for InMemoryPriceAdjuster {
    async fn adjust(
        &self,
        _user_id: &str,
        _order_type: OrderType,
        _total: Money,
    ) -> Result<Adjustments, ClientError> {
        self.state
            .read()
            .map(|state| *state)
            .map_err(|_| ClientError::Unavailable("price adjuster poisoned".into()))
    }
}

#[derive(Debug, Default)]
struct AddressBook {
    addresses: HashMap<(String, String), Receiver>,
    fail_on_lookup: bool,
}

/// In-memory address book.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    state: Arc<RwLock<AddressBook>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_address(&self, user_id: &str, address_id: &str, receiver: Receiver) {
        if let Ok(mut state) = self.state.write() {
            state
                .addresses
                .insert((user_id.to_string(), address_id.to_string()), receiver);
        }
    }

    pub fn set_fail_on_lookup(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_lookup = fail;
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_receiver(&self, user_id: &str, address_id: &str) -> Result<Receiver, ClientError> {
        let state = self
            .state
            .read()
            .map_err(|_| ClientError::Unavailable("address book poisoned".into()))?;
        if state.fail_on_lookup {
            return Err(ClientError::Unavailable("user service".into()));
        }
        state
            .addresses
            .get(&(user_id.to_string(), address_id.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("address {address_id}")))
    }
}

#[derive(Debug, Default)]
struct CartCalls {
    removed: Vec<(String, Vec<String>)>,
    fail_on_remove: bool,
}

/// Records cart removals instead of calling a cart service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartClient {
    state: Arc<RwLock<CartCalls>>,
}

impl InMemoryCartClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_remove(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_remove = fail;
        }
    }

    /// `(user_id, item_ids)` for every successful call.
    pub fn removed(&self) -> Vec<(String, Vec<String>)> {
        self.state
            .read()
            .map(|state| state.removed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CartClient for InMemoryCartClient {
    async fn remove_items(&self, user_id: &str, item_ids: &[String]) -> Result<(), ClientError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ClientError::Unavailable("cart recorder poisoned".into()))?;
        if state.fail_on_remove {
            return Err(ClientError::Unavailable("cart service".into()));
        }
        state
            .removed
            .push((user_id.to_string(), item_ids.to_vec()));
        Ok(())
    }
}
