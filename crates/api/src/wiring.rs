//! Builds every service from configuration.

use std::sync::Arc;

use cart::{CartService, CartStore, InMemoryCartStore, PostgresCartStore};
use common::InMemoryProductCatalog;
use inventory::{InMemoryStockRepository, InventoryService, PostgresStockRepository, StockRepository};
use kv::{InMemoryKeyValueStore, KeyValueStore, KvError, RedisKeyValueStore};
use messaging::{BrokerError, InMemoryBroker, MessageBroker};
use order::{
    InMemoryOrderRepository, InMemoryUserDirectory, ORDER_OUTBOX_TABLE, OrderRepository,
    OrderService, OrderSettings, PostgresOrderRepository,
};
use outbox::{OutboxStore, PostgresOutboxStore};
use payment::{
    AcceptAllVerifier, ChannelRegistry, InMemoryPaymentRepository, PAYMENT_OUTBOX_TABLE,
    PaymentRepository, PaymentService, PaymentSettings, PostgresPaymentRepository,
    Sha256Verifier, SignatureVerifier,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::adapters::{CartLink, OrderLink};
use crate::config::Config;

const MIGRATIONS: [(&str, &str); 4] = [
    ("001_inventory", include_str!("../../../migrations/001_inventory.sql")),
    ("002_orders", include_str!("../../../migrations/002_orders.sql")),
    ("003_payments", include_str!("../../../migrations/003_payments.sql")),
    ("004_cart", include_str!("../../../migrations/004_cart.sql")),
];

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Services shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub inventory: InventoryService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub cart: CartService,
    /// External collaborators, seeded through the admin routes.
    pub catalog: InMemoryProductCatalog,
    pub users: InMemoryUserDirectory,
}

struct Stores {
    kv: Arc<dyn KeyValueStore>,
    stock: Arc<dyn StockRepository>,
    orders: Arc<dyn OrderRepository>,
    order_outbox: Arc<dyn OutboxStore>,
    payments: Arc<dyn PaymentRepository>,
    payment_outbox: Arc<dyn OutboxStore>,
    carts: Arc<dyn CartStore>,
}

impl Stores {
    fn in_memory() -> Self {
        let orders = InMemoryOrderRepository::new();
        let payments = InMemoryPaymentRepository::new();
        Self {
            kv: Arc::new(InMemoryKeyValueStore::new()),
            stock: Arc::new(InMemoryStockRepository::new()),
            order_outbox: Arc::new(orders.outbox()),
            orders: Arc::new(orders),
            payment_outbox: Arc::new(payments.outbox()),
            payments: Arc::new(payments),
            carts: Arc::new(InMemoryCartStore::new()),
        }
    }

    fn postgres(pool: PgPool, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            stock: Arc::new(PostgresStockRepository::new(pool.clone())),
            orders: Arc::new(PostgresOrderRepository::new(pool.clone())),
            order_outbox: Arc::new(PostgresOutboxStore::new(pool.clone(), ORDER_OUTBOX_TABLE)),
            payments: Arc::new(PostgresPaymentRepository::new(pool.clone())),
            payment_outbox: Arc::new(PostgresOutboxStore::new(pool.clone(), PAYMENT_OUTBOX_TABLE)),
            carts: Arc::new(PostgresCartStore::new(pool)),
        }
    }
}

/// Everything the server and its background tasks run on.
pub struct Stack {
    pub state: AppState,
    pub broker: Arc<dyn MessageBroker>,
    pub order_outbox: Arc<dyn OutboxStore>,
    pub payment_outbox: Arc<dyn OutboxStore>,
    pub cart_store: Arc<dyn CartStore>,
}

impl Stack {
    /// Connects to Postgres and Redis when configured, otherwise runs fully
    /// in memory.
    pub async fn build(config: &Config) -> Result<Self, BootstrapError> {
        let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => {
                tracing::info!("using redis key-value store");
                Arc::new(RedisKeyValueStore::connect(url).await?)
            }
            None => Arc::new(InMemoryKeyValueStore::new()),
        };

        let stores = match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                run_migrations(&pool).await?;
                tracing::info!("using postgres repositories");
                Stores::postgres(pool, kv)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, state is kept in memory");
                Stores {
                    kv,
                    ..Stores::in_memory()
                }
            }
        };
        Ok(Self::assemble(stores, config))
    }

    /// Fully in-memory stack.
    pub fn in_memory(config: &Config) -> Self {
        Self::assemble(Stores::in_memory(), config)
    }

    fn assemble(stores: Stores, config: &Config) -> Self {
        let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
        let catalog = InMemoryProductCatalog::new();
        let users = InMemoryUserDirectory::new();

        let inventory = InventoryService::new(stores.stock);

        let cart = CartService::new(
            stores.kv.clone(),
            stores.carts.clone(),
            Arc::new(catalog.clone()),
            Arc::new(inventory.clone()),
            broker.clone(),
        );

        let orders = OrderService::with_settings(
            stores.orders,
            Arc::new(inventory.clone()),
            Arc::new(catalog.clone()),
            Arc::new(users.clone()),
            Arc::new(CartLink(cart.clone())),
            stores.kv.clone(),
            OrderSettings {
                pay_timeout: config.pay_timeout,
                ..OrderSettings::default()
            },
        );

        let verifier: Arc<dyn SignatureVerifier> = match &config.payment_signing_key {
            Some(key) => Arc::new(Sha256Verifier::new(key.clone())),
            None => {
                tracing::warn!("PAYMENT_SIGNING_KEY not set, callback signatures are not checked");
                Arc::new(AcceptAllVerifier)
            }
        };
        let channels = ChannelRegistry::with_defaults(
            config.payment_environment,
            &format!("http://{}/payments/callback", config.addr()),
        );
        let payments = PaymentService::with_settings(
            stores.payments,
            Arc::new(OrderLink(orders.clone())),
            stores.kv,
            channels,
            verifier,
            PaymentSettings {
                pay_timeout: config.pay_timeout,
                ..PaymentSettings::default()
            },
        );

        Self {
            state: AppState {
                inventory,
                orders,
                payments,
                cart,
                catalog,
                users,
            },
            broker,
            order_outbox: stores.order_outbox,
            payment_outbox: stores.payment_outbox,
            cart_store: stores.carts,
        }
    }
}

/// Applies every schema file. Each one is idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql).execute(pool).await?;
        tracing::debug!(migration = name, "migration applied");
    }
    Ok(())
}
