//! PostgreSQL integration tests for the payment repository.
//!
//! ```bash
//! cargo test -p payment --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{EntityId, Money};
use outbox::{OutboxEntry, OutboxStore, PostgresOutboxStore};
use payment::{
    CallbackUpdate, PAYMENT_OUTBOX_TABLE, Payment, PaymentChannel, PaymentError, PaymentLog,
    PaymentLogAction, PaymentRepository, PaymentStatus, PostgresPaymentRepository,
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
            sqlx::raw_sql(include_str!("../../../migrations/003_payments.sql"))
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

async fn get_test_repo() -> PostgresPaymentRepository {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE payments, payment_logs, payment_outbox")
        .execute(&pool)
        .await
        .unwrap();
    PostgresPaymentRepository::new(pool)
}

fn payment(payment_no: &str, order_no: &str) -> Payment {
    let now = Utc::now();
    Payment {
        id: EntityId::new(),
        payment_no: payment_no.into(),
        order_no: order_no.into(),
        user_id: "u1".into(),
        amount: Money::from_cents(2000),
        channel: PaymentChannel::Alipay,
        status: PaymentStatus::Pending,
        trade_no: None,
        notify_url: "http://cb".into(),
        return_url: String::new(),
        paid_at: None,
        expired_at: now + Duration::minutes(30),
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

fn log(payment_no: &str, action: PaymentLogAction, to: PaymentStatus) -> PaymentLog {
    PaymentLog::new(payment_no, action, None, to, "")
}

fn success(payment_no: &str, trade_no: &str, version: i64) -> CallbackUpdate {
    CallbackUpdate {
        payment_no: payment_no.into(),
        expected_version: version,
        from: PaymentStatus::Pending,
        to: PaymentStatus::Success,
        trade_no: trade_no.into(),
        paid_at: Some(Utc::now()),
    }
}

fn event(payment_no: &str) -> OutboxEntry {
    OutboxEntry::builder()
        .event_type("payment.succeeded")
        .aggregate_id(payment_no)
        .partition_key("O1")
        .payload_raw("{}")
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_load_round_trip() {
    let repo = get_test_repo().await;
    let p = payment("P1", "O1");
    repo.insert(&p, &log("P1", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();

    let loaded = repo.get("P1").await.unwrap().unwrap();
    assert_eq!(loaded.order_no, "O1");
    assert_eq!(loaded.amount, Money::from_cents(2000));
    assert_eq!(loaded.channel, PaymentChannel::Alipay);
    assert_eq!(repo.find_by_order("O1").await.unwrap().unwrap().payment_no, "P1");
    assert_eq!(repo.logs_for("P1").await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn second_open_payment_for_order_is_duplicate() {
    let repo = get_test_repo().await;
    repo.insert(&payment("P1", "O1"), &log("P1", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();
    let err = repo
        .insert(&payment("P2", "O1"), &log("P2", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::DuplicatePayment(_)));
    // The failed insert left no log behind.
    assert!(repo.logs_for("P2").await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn callback_commits_payment_log_and_outbox_together() {
    let repo = get_test_repo().await;
    repo.insert(&payment("P1", "O1"), &log("P1", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();

    let cb_log = log("P1", PaymentLogAction::Callback, PaymentStatus::Success);
    repo.apply_callback(&success("P1", "T1", 0), &cb_log, Some(&event("P1")))
        .await
        .unwrap();
    let err = repo
        .apply_callback(&success("P1", "T1", 0), &cb_log, Some(&event("P1")))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::StaleState(_)));

    let p = repo.get("P1").await.unwrap().unwrap();
    assert_eq!(p.status, PaymentStatus::Success);
    assert_eq!(p.trade_no.as_deref(), Some("T1"));
    assert!(p.paid_at.is_some());
    assert_eq!(repo.find_by_trade_no("T1").await.unwrap().unwrap().payment_no, "P1");

    let outbox = PostgresOutboxStore::new(repo.pool().clone(), PAYMENT_OUTBOX_TABLE);
    assert_eq!(outbox.find_by_aggregate("P1").await.unwrap().len(), 1);
    assert_eq!(repo.logs_for("P1").await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn reused_trade_no_rolls_back_everything() {
    let repo = get_test_repo().await;
    for (p, o) in [("P1", "O1"), ("P2", "O2")] {
        repo.insert(&payment(p, o), &log(p, PaymentLogAction::Create, PaymentStatus::Pending))
            .await
            .unwrap();
    }
    repo.apply_callback(
        &success("P1", "T1", 0),
        &log("P1", PaymentLogAction::Callback, PaymentStatus::Success),
        None,
    )
    .await
    .unwrap();

    let err = repo
        .apply_callback(
            &success("P2", "T1", 0),
            &log("P2", PaymentLogAction::Callback, PaymentStatus::Success),
            Some(&event("P2")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::TradeNoInUse(_)));

    let outbox = PostgresOutboxStore::new(repo.pool().clone(), PAYMENT_OUTBOX_TABLE);
    assert!(outbox.find_by_aggregate("P2").await.unwrap().is_empty());
    assert_eq!(repo.get("P2").await.unwrap().unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
#[serial]
async fn expired_payments_close_once() {
    let repo = get_test_repo().await;
    let mut old = payment("P1", "O1");
    old.expired_at = Utc::now() - Duration::minutes(1);
    repo.insert(&old, &log("P1", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();
    repo.insert(&payment("P2", "O2"), &log("P2", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();

    let expired = repo.find_expired(Utc::now(), 10).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].payment_no, "P1");

    let close_log = log("P1", PaymentLogAction::Close, PaymentStatus::Closed);
    repo.close("P1", 0, Utc::now(), &close_log).await.unwrap();
    let err = repo.close("P1", 0, Utc::now(), &close_log).await.unwrap_err();
    assert!(matches!(err, PaymentError::StaleState(_)));
    assert!(repo.find_expired(Utc::now(), 10).await.unwrap().is_empty());

    // A closed payment no longer blocks a new one for the order.
    repo.insert(&payment("P3", "O1"), &log("P3", PaymentLogAction::Create, PaymentStatus::Pending))
        .await
        .unwrap();
}
