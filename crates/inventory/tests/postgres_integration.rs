//! PostgreSQL integration tests for the stock repository.
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use inventory::{
    InventoryError, InventoryService, PostgresStockRepository, StockChangeReason, StockItem,
    StockRepository,
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
            sqlx::raw_sql(include_str!("../../../migrations/001_inventory.sql"))
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

async fn get_test_repo() -> PostgresStockRepository {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE stock, stock_logs")
        .execute(&pool)
        .await
        .unwrap();
    PostgresStockRepository::new(pool)
}

#[tokio::test]
#[serial]
async fn deduct_and_rollback_round_trip() {
    let repo = get_test_repo().await;
    repo.set_stock("A", 5).await.unwrap();

    repo.deduct("o1", &[StockItem::new("A", 2)]).await.unwrap();
    assert_eq!(repo.get("A").await.unwrap().unwrap().available_count, 3);

    repo.rollback("o1", &[StockItem::new("A", 2)]).await.unwrap();
    let stock = repo.get("A").await.unwrap().unwrap();
    assert_eq!(stock.available_count, 5);
    assert_eq!(stock.version, 2);

    let logs = repo.logs_for_ref("o1").await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].reason, StockChangeReason::Deduct);
    assert_eq!(logs[0].delta, -2);
    assert_eq!(logs[1].reason, StockChangeReason::Rollback);
    assert_eq!(logs[1].delta, 2);
}

#[tokio::test]
#[serial]
async fn partial_deduct_never_commits() {
    let repo = get_test_repo().await;
    repo.set_stock("A", 5).await.unwrap();
    repo.set_stock("B", 0).await.unwrap();

    let err = repo
        .deduct("o1", &[StockItem::new("A", 1), StockItem::new("B", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { ref sku_id } if sku_id == "B"));
    assert_eq!(repo.get("A").await.unwrap().unwrap().available_count, 5);
    assert!(repo.logs_for_ref("o1").await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn concurrent_deducts_stop_at_zero() {
    let repo = get_test_repo().await;
    repo.set_stock("A", 3).await.unwrap();
    let service = InventoryService::new(Arc::new(repo.clone()));

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .deduct(&format!("o{i}"), &[StockItem::new("A", 1)])
                .await
                .is_ok()
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap() {
            ok += 1;
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(repo.get("A").await.unwrap().unwrap().available_count, 0);
}

#[tokio::test]
#[serial]
async fn batch_get_and_net_delta() {
    let repo = get_test_repo().await;
    repo.set_stock("A", 5).await.unwrap();
    repo.set_stock("B", 5).await.unwrap();
    let since = Utc::now() - chrono::Duration::seconds(5);

    repo.deduct("o1", &[StockItem::new("A", 1), StockItem::new("B", 2)])
        .await
        .unwrap();

    let stock = repo
        .batch_get(&["A".to_string(), "B".to_string(), "C".to_string()])
        .await
        .unwrap();
    assert_eq!(stock.len(), 2);
    assert_eq!(stock["B"].available_count, 3);

    let net = repo.net_delta_by_ref(since).await.unwrap();
    assert_eq!(net.get("o1"), Some(&-3));
}
