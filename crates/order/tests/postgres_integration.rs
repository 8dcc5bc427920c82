//! PostgreSQL integration tests for the order repository.
//!
//! ```bash
//! cargo test -p order --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use common::{EntityId, Money, OrderType};
use messaging::OrderTimeout;
use order::{
    ORDER_OUTBOX_TABLE, Order, OrderError, OrderItem, OrderRepository, OrderStatus,
    PostgresOrderRepository, Receiver,
};
use outbox::{OutboxEntry, OutboxStore, PostgresOutboxStore};
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

async fn get_test_repo() -> PostgresOrderRepository {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE order_items, orders, order_outbox")
        .execute(&pool)
        .await
        .unwrap();
    PostgresOrderRepository::new(pool)
}

fn order(order_no: &str, user: &str) -> Order {
    // Postgres keeps microseconds.
    let now = Utc::now().trunc_subsecs(6);
    Order {
        id: EntityId::new(),
        order_no: order_no.into(),
        user_id: user.into(),
        order_type: OrderType::Normal,
        status: OrderStatus::PendingPay,
        total_amount: Money::from_cents(2000),
        discount_amount: Money::zero(),
        shipping_amount: Money::from_cents(100),
        pay_amount: Money::from_cents(2100),
        receiver: Receiver {
            name: "Ada".into(),
            city: "Springfield".into(),
            ..Receiver::default()
        },
        buyer_remark: "leave at door".into(),
        items: vec![OrderItem {
            id: EntityId::new(),
            order_no: order_no.into(),
            product_id: "P-1".into(),
            sku_id: "SKU-A".into(),
            product_title: "Widget".into(),
            product_image: String::new(),
            sku_name: "Blue".into(),
            unit_price: Money::from_cents(1000),
            quantity: 2,
            subtotal: Money::from_cents(2000),
        }],
        pay_channel: None,
        pay_trade_no: None,
        created_at: now,
        paid_at: None,
        shipped_at: None,
        completed_at: None,
        closed_at: None,
        updated_at: now,
        version: 0,
    }
}

fn timeout_entry(order: &Order) -> OutboxEntry {
    OutboxEntry::for_event(&OrderTimeout {
        order_no: order.order_no.clone(),
        user_id: order.user_id.clone(),
        created_at: order.created_at,
    })
    .unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_get_round_trips_items_and_outbox() {
    let repo = get_test_repo().await;
    let o = order("0120250101000000000100", "u1");

    repo.insert(&o, &[timeout_entry(&o)]).await.unwrap();

    let loaded = repo.get(&o.order_no).await.unwrap().unwrap();
    assert_eq!(loaded, o);

    let outbox = PostgresOutboxStore::new(repo.pool().clone(), ORDER_OUTBOX_TABLE);
    let pending = outbox.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].aggregate_id, o.order_no);
}

#[tokio::test]
#[serial]
async fn duplicate_order_no_is_reported_and_nothing_is_written() {
    let repo = get_test_repo().await;
    let o = order("0120250101000000000200", "u1");
    repo.insert(&o, &[]).await.unwrap();

    let mut dup = order("0120250101000000000200", "u2");
    dup.items[0].id = EntityId::new();
    let err = repo.insert(&dup, &[timeout_entry(&dup)]).await.unwrap_err();
    assert!(matches!(err, OrderError::DuplicateOrderNo(_)));

    let outbox = PostgresOutboxStore::new(repo.pool().clone(), ORDER_OUTBOX_TABLE);
    assert!(outbox.fetch_pending(10).await.unwrap().is_empty());
    assert_eq!(repo.get(&o.order_no).await.unwrap().unwrap().user_id, "u1");
}

#[tokio::test]
#[serial]
async fn transitions_are_optimistic() {
    let repo = get_test_repo().await;
    let o = order("0120250101000000000300", "u1");
    repo.insert(&o, &[]).await.unwrap();
    let now = Utc::now();

    repo.mark_paid(&o.order_no, 0, "wechat", "WX-1", now)
        .await
        .unwrap();
    let err = repo
        .transition(&o.order_no, OrderStatus::PendingPay, OrderStatus::Cancelled, 0, now)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::StaleState(_)));

    repo.transition(&o.order_no, OrderStatus::Paid, OrderStatus::Shipped, 1, now)
        .await
        .unwrap();
    let loaded = repo.get(&o.order_no).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Shipped);
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.pay_trade_no.as_deref(), Some("WX-1"));
    assert!(loaded.shipped_at.is_some());
    assert!(loaded.closed_at.is_none());
}

#[tokio::test]
#[serial]
async fn list_and_expired_queries() {
    let repo = get_test_repo().await;
    for i in 0..3 {
        let mut o = order(&format!("01202501010000000004{i}0"), "u1");
        o.created_at = o.created_at - Duration::hours(3 - i);
        o.items[0].order_no = o.order_no.clone();
        repo.insert(&o, &[]).await.unwrap();
    }
    repo.insert(&order("0120250101000000000500", "u2"), &[])
        .await
        .unwrap();

    let (page, total) = repo.list_for_user("u1", None, 0, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].order_no, "0120250101000000000420");
    assert_eq!(page[0].items.len(), 1);

    let (paid, total) = repo
        .list_for_user("u1", Some(OrderStatus::Paid), 0, 10)
        .await
        .unwrap();
    assert!(paid.is_empty());
    assert_eq!(total, 0);

    let expired = repo
        .find_expired_pending(Utc::now() - Duration::minutes(90), 10)
        .await
        .unwrap();
    let nos: Vec<&str> = expired.iter().map(|o| o.order_no.as_str()).collect();
    assert_eq!(nos, vec!["0120250101000000000400", "0120250101000000000410"]);
}
