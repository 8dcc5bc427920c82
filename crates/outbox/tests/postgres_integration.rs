//! PostgreSQL integration tests for the outbox store.
//!
//! ```bash
//! cargo test -p outbox --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use messaging::InMemoryBroker;
use outbox::{
    DispatcherConfig, OutboxDispatcher, OutboxEntry, OutboxStatus, OutboxStore,
    PostgresOutboxStore, Route,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_orders.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOutboxStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE order_outbox")
        .execute(&pool)
        .await
        .unwrap();
    PostgresOutboxStore::new(pool, "order_outbox")
}

fn entry(aggregate: &str, n: i32) -> OutboxEntry {
    OutboxEntry::builder()
        .event_type("order.timeout")
        .aggregate_id(aggregate)
        .partition_key(aggregate)
        .payload_raw(format!(r#"{{"n":{n}}}"#))
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_fetch_pending_in_order() {
    let store = get_test_store().await;
    for n in 0..3 {
        store.insert(entry("o1", n)).await.unwrap();
    }

    let pending = store.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].payload, r#"{"n":0}"#);
    assert_eq!(pending[2].payload, r#"{"n":2}"#);
    assert_eq!(pending[0].partition_key.as_deref(), Some("o1"));
}

#[tokio::test]
#[serial]
async fn insert_in_tx_rolls_back_with_caller() {
    let store = get_test_store().await;
    let mut tx = store.pool().begin().await.unwrap();
    PostgresOutboxStore::insert_in_tx(&mut *tx, "order_outbox", &entry("o1", 1))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find_by_aggregate("o1").await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn mark_failed_and_retry_cap() {
    let store = get_test_store().await;
    let e = entry("o1", 1);
    let id = e.id;
    store.insert(e).await.unwrap();

    assert_eq!(store.mark_failed(id, "broker down").await.unwrap(), 1);
    let retryable = store.fetch_retryable(10, 2).await.unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].error_msg.as_deref(), Some("broker down"));

    assert_eq!(store.mark_failed(id, "broker down").await.unwrap(), 2);
    assert!(store.fetch_retryable(10, 2).await.unwrap().is_empty());

    store.mark_sent(id).await.unwrap();
    let rows = store.find_by_aggregate("o1").await.unwrap();
    assert_eq!(rows[0].status, OutboxStatus::Sent);
    assert!(rows[0].error_msg.is_none());
}

#[tokio::test]
#[serial]
async fn dispatcher_drains_postgres_outbox() {
    let store = get_test_store().await;
    let broker = InMemoryBroker::new();
    for n in 0..5 {
        store.insert(entry(&format!("o{n}"), n)).await.unwrap();
    }

    let dispatcher = OutboxDispatcher::new(
        "order",
        Arc::new(store.clone()),
        Arc::new(broker.clone()),
        DispatcherConfig::default(),
    )
    .with_route("order.timeout", Route::topic("order.timeout.dlq"));

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.sent, 5);
    assert!(store.fetch_pending(10).await.unwrap().is_empty());
    assert_eq!(broker.published("order.timeout.dlq").await.len(), 5);
}
