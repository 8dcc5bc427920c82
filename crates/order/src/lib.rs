//! Order core.
//!
//! Owns the order aggregate and its state machine, runs the creation saga
//! (deduct inventory first, then persist, compensating on failure), and
//! closes unpaid orders through the timeout consumer and the periodic
//! reaper. Payment success arrives as a `payment.succeeded` event.

pub mod clients;
pub mod consumers;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod reaper;
pub mod reconcile;
pub mod repository;
pub mod service;
pub mod status;

pub use clients::{
    Adjustments, CartClient, ClientError, InMemoryCartClient, InMemoryPriceAdjuster,
    InMemoryUserDirectory, InventoryClient, NoAdjustments, PriceAdjuster, UserDirectory,
};
pub use consumers::{OrderTimeoutConsumer, PaymentEventConsumer};
pub use error::{OrderError, Result};
pub use memory::InMemoryOrderRepository;
pub use model::{
    CreateOrderRequest, CreateOrderResult, Order, OrderItem, OrderLineRequest, OrderPage,
    OrderToken, Receiver,
};
pub use postgres::{ORDER_OUTBOX_TABLE, PostgresOrderRepository};
pub use reaper::{ReapReport, ReaperConfig, TimeoutReaper};
pub use reconcile::{ReconcileReport, Reconciler};
pub use repository::OrderRepository;
pub use service::{MarkPaidOutcome, OrderService, OrderSettings};
pub use status::OrderStatus;
