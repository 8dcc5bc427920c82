//! End-to-end tests for the payment core over the in-memory stack.

use std::sync::Arc;
use std::time::Duration;

use common::{ErrorKind, Money};
use kv::{InMemoryKeyValueStore, KeyValueStore};
use messaging::{InMemoryBroker, PaymentSucceeded, topics};
use outbox::{DispatcherConfig, OutboxDispatcher, OutboxStatus, OutboxStore, Route};
use payment::{
    CallbackOutcome, CallbackRequest, ChannelConfig, ChannelRegistry, CreatePaymentRequest,
    Environment, ExpiredPaymentSweeper, InMemoryOrderClient, InMemoryPaymentRepository,
    PaymentChannel, PaymentError, PaymentLogAction, PaymentService, PaymentSettings,
    PaymentStatus, Sha256Verifier, SweeperConfig,
};

const USER: &str = "user-1";
const ORDER: &str = "0120250101120012345600";
const SIGNING_KEY: &str = "test-secret";

struct TestHarness {
    orders: InMemoryOrderClient,
    kv: InMemoryKeyValueStore,
    repo: InMemoryPaymentRepository,
    signer: Sha256Verifier,
    service: PaymentService,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_settings(PaymentSettings::default())
    }

    /// Payments expire as soon as they are created.
    fn expiring() -> Self {
        Self::with_settings(PaymentSettings {
            pay_timeout: Duration::ZERO,
            ..PaymentSettings::default()
        })
    }

    fn with_settings(settings: PaymentSettings) -> Self {
        let orders = InMemoryOrderClient::new();
        orders.add_pending(ORDER, USER, Money::from_cents(2000));

        let kv = InMemoryKeyValueStore::new();
        let repo = InMemoryPaymentRepository::new();
        let signer = Sha256Verifier::new(SIGNING_KEY);
        let channels = ChannelRegistry::with_defaults(Environment::Sandbox, "http://localhost/cb");
        let service = PaymentService::with_settings(
            Arc::new(repo.clone()),
            Arc::new(orders.clone()),
            Arc::new(kv.clone()),
            channels,
            Arc::new(signer.clone()),
            settings,
        );
        Self {
            orders,
            kv,
            repo,
            signer,
            service,
        }
    }

    async fn request(&self, channel: PaymentChannel) -> CreatePaymentRequest {
        let token = self
            .service
            .generate_payment_token(USER, ORDER)
            .await
            .unwrap();
        CreatePaymentRequest {
            user_id: USER.into(),
            order_no: ORDER.into(),
            token: token.token,
            channel,
            return_url: String::new(),
        }
    }

    async fn create(&self) -> String {
        let req = self.request(PaymentChannel::WeChat).await;
        self.service
            .create_payment(req)
            .await
            .unwrap()
            .payment
            .payment_no
    }

    fn callback(&self, payment_no: &str, trade_no: &str, amount: &str, status: &str) -> CallbackRequest {
        let mut cb = CallbackRequest {
            payment_no: payment_no.into(),
            channel: "wechat".into(),
            trade_no: trade_no.into(),
            amount: amount.into(),
            status: status.into(),
            ..CallbackRequest::default()
        };
        cb.signature = self.signer.sign(&cb);
        cb
    }

    async fn status(&self, payment_no: &str) -> PaymentStatus {
        self.service.get_payment(USER, payment_no).await.unwrap().status
    }
}

#[tokio::test]
async fn create_payment_returns_pending_with_channel_params() {
    let h = TestHarness::new();
    let req = h.request(PaymentChannel::Alipay).await;

    let created = h.service.create_payment(req).await.unwrap();
    let payment = &created.payment;
    assert!(payment.payment_no.starts_with("10"));
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, Money::from_cents(2000));
    assert_eq!(payment.notify_url, "http://localhost/cb");
    assert!(payment.expired_at > payment.created_at);
    assert!(created.pay_params.pay_url.is_some());
    assert!(created.pay_params.params.contains_key("biz_content"));

    let logs = h.service.payment_logs(&payment.payment_no).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, PaymentLogAction::Create);
}

#[tokio::test]
async fn balance_channel_has_no_redirect() {
    let h = TestHarness::new();
    let req = h.request(PaymentChannel::Balance).await;
    let created = h.service.create_payment(req).await.unwrap();
    assert!(created.pay_params.pay_url.is_none());
    assert!(created.pay_params.qr_code.is_none());
    assert_eq!(created.pay_params.params["channel"], "balance");
}

#[tokio::test]
async fn resubmitting_the_same_request_returns_the_same_payment() {
    let h = TestHarness::new();
    let req = h.request(PaymentChannel::WeChat).await;

    let first = h.service.create_payment(req.clone()).await.unwrap();
    let second = h.service.create_payment(req).await.unwrap();
    assert_eq!(first.payment.payment_no, second.payment.payment_no);

    // A fresh token still resolves to the open payment.
    let third = h
        .service
        .create_payment(h.request(PaymentChannel::WeChat).await)
        .await
        .unwrap();
    assert_eq!(third.payment.payment_no, first.payment.payment_no);
    assert_eq!(h.repo.count().await, 1);
}

#[tokio::test]
async fn concurrent_creates_yield_one_payment() {
    let h = TestHarness::new();
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        let req = h.request(PaymentChannel::WeChat).await;
        tasks.push(tokio::spawn(async move { service.create_payment(req).await }));
    }

    let mut payment_nos = std::collections::HashSet::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(created) => {
                payment_nos.insert(created.payment.payment_no);
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::Busy),
        }
    }
    assert_eq!(payment_nos.len(), 1);
    assert_eq!(h.repo.count().await, 1);
}

#[tokio::test]
async fn create_requires_a_token_bound_to_the_order() {
    let h = TestHarness::new();
    let mut req = h.request(PaymentChannel::WeChat).await;
    req.token = "forged".into();
    let err = h.service.create_payment(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    h.orders.add_pending("0120250101120099999900", USER, Money::from_cents(100));
    let mut req = h.request(PaymentChannel::WeChat).await;
    req.order_no = "0120250101120099999900".into();
    let err = h.service.create_payment(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn create_refuses_unpayable_or_foreign_orders() {
    let h = TestHarness::new();
    let req = h.request(PaymentChannel::WeChat).await;
    h.orders.add_pending(ORDER, "someone-else", Money::from_cents(2000));
    let err = h.service.create_payment(req.clone()).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));

    h.orders.upsert(payment::OrderSnapshot {
        order_no: ORDER.into(),
        user_id: USER.into(),
        is_pending_pay: false,
        pay_amount: Money::from_cents(2000),
    });
    let err = h.service.create_payment(req).await.unwrap_err();
    assert!(matches!(err, PaymentError::OrderNotPayable(_)));
}

#[tokio::test]
async fn create_refuses_disabled_channel_and_order_outage() {
    let orders = InMemoryOrderClient::new();
    orders.add_pending(ORDER, USER, Money::from_cents(2000));
    let kv = InMemoryKeyValueStore::new();
    let channels = ChannelRegistry::with_defaults(Environment::Sandbox, "").with_config(ChannelConfig {
        channel: PaymentChannel::WeChat,
        name: "wechat".into(),
        app_id: String::new(),
        notify_url: String::new(),
        return_url: String::new(),
        environment: Environment::Sandbox,
        enabled: false,
    });
    let service = PaymentService::new(
        Arc::new(InMemoryPaymentRepository::new()),
        Arc::new(orders.clone()),
        Arc::new(kv),
        channels,
        Arc::new(payment::AcceptAllVerifier),
    );
    let token = service.generate_payment_token(USER, ORDER).await.unwrap();
    let req = CreatePaymentRequest {
        user_id: USER.into(),
        order_no: ORDER.into(),
        token: token.token,
        channel: PaymentChannel::WeChat,
        return_url: String::new(),
    };
    let err = service.create_payment(req.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    orders.set_fail_on_lookup(true);
    let err = service.create_payment(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
}

#[tokio::test]
async fn success_callback_writes_one_outbox_row() {
    let h = TestHarness::new();
    let payment_no = h.create().await;
    let cb = h.callback(&payment_no, "WX-1", "20.00", "SUCCESS");

    let outcome = h.service.handle_callback(cb).await.unwrap();
    assert_eq!(outcome, CallbackOutcome::Succeeded);

    let payment = h.service.get_payment(USER, &payment_no).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.trade_no.as_deref(), Some("WX-1"));
    assert!(payment.paid_at.is_some());

    let rows = h.repo.outbox().find_by_aggregate(&payment_no).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_type, "payment.succeeded");
    assert_eq!(rows[0].partition_key.as_deref(), Some(ORDER));
    let event: PaymentSucceeded = serde_json::from_str(&rows[0].payload).unwrap();
    assert_eq!(event.order_no, ORDER);
    assert_eq!(event.amount, Money::from_cents(2000));
}

#[tokio::test]
async fn duplicate_callbacks_apply_once() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let cb = h.callback(&payment_no, "WX-1", "20.00", "success");
        outcomes.push(h.service.handle_callback(cb).await.unwrap());
    }
    assert_eq!(
        outcomes,
        vec![
            CallbackOutcome::Succeeded,
            CallbackOutcome::AlreadyProcessed,
            CallbackOutcome::AlreadyProcessed
        ]
    );
    assert_eq!(h.repo.outbox().count_by_status(OutboxStatus::Pending).await, 1);
    let payment = h.service.get_payment(USER, &payment_no).await.unwrap();
    assert_eq!(payment.version, 1);
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_apply_once() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let service = h.service.clone();
        let cb = h.callback(&payment_no, "WX-1", "20.00", "SUCCESS");
        tasks.push(tokio::spawn(async move { service.handle_callback(cb).await }));
    }
    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(CallbackOutcome::Succeeded) => succeeded += 1,
            Ok(_) => {}
            Err(e) => assert_eq!(e.kind(), ErrorKind::Busy),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(h.repo.outbox().all().await.len(), 1);
}

#[tokio::test]
async fn amount_mismatch_is_rejected_and_remembered() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let cb = h.callback(&payment_no, "WX-1", "0.01", "SUCCESS");
    let err = h.service.handle_callback(cb.clone()).await.unwrap_err();
    assert!(matches!(err, PaymentError::AmountMismatch { .. }));
    assert_eq!(h.status(&payment_no).await, PaymentStatus::Pending);
    assert!(h.repo.outbox().all().await.is_empty());

    let err = h.service.handle_callback(cb).await.unwrap_err();
    assert!(matches!(err, PaymentError::CallbackRejected(_)));
}

#[tokio::test]
async fn forged_signature_changes_nothing() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let mut cb = h.callback(&payment_no, "WX-1", "20.00", "SUCCESS");
    cb.signature = "00".repeat(32);
    let err = h.service.handle_callback(cb).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidSignature));
    assert_eq!(h.status(&payment_no).await, PaymentStatus::Pending);
}

#[tokio::test]
async fn forged_callback_does_not_block_the_genuine_one() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let genuine = h.callback(&payment_no, "WX-1", "20.00", "SUCCESS");
    let mut forged = genuine.clone();
    forged.signature = "00".repeat(32);
    let err = h.service.handle_callback(forged.clone()).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidSignature));
    let err = h.service.handle_callback(forged).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidSignature));

    let outcome = h.service.handle_callback(genuine).await.unwrap();
    assert_eq!(outcome, CallbackOutcome::Succeeded);
    assert_eq!(h.status(&payment_no).await, PaymentStatus::Success);
}

#[tokio::test]
async fn callback_for_unknown_payment_is_not_remembered() {
    let h = TestHarness::new();

    let early = h.callback("1020250101120000000100", "WX-9", "20.00", "SUCCESS");
    let err = h.service.handle_callback(early.clone()).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
    let err = h.service.handle_callback(early).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
}

#[tokio::test]
async fn trade_no_cannot_pay_two_payments() {
    let h = TestHarness::new();
    let first = h.create().await;
    h.service
        .handle_callback(h.callback(&first, "WX-1", "20.00", "SUCCESS"))
        .await
        .unwrap();

    let other_order = "0120250101120055555500";
    h.orders.add_pending(other_order, USER, Money::from_cents(2000));
    let token = h.service.generate_payment_token(USER, other_order).await.unwrap();
    let second = h
        .service
        .create_payment(CreatePaymentRequest {
            user_id: USER.into(),
            order_no: other_order.into(),
            token: token.token,
            channel: PaymentChannel::WeChat,
            return_url: String::new(),
        })
        .await
        .unwrap()
        .payment
        .payment_no;

    let err = h
        .service
        .handle_callback(h.callback(&second, "WX-1", "20.00", "SUCCESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::TradeNoInUse(_)));
    assert_eq!(h.status(&second).await, PaymentStatus::Pending);
}

#[tokio::test]
async fn failed_callback_then_success_with_new_trade() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let outcome = h
        .service
        .handle_callback(h.callback(&payment_no, "WX-1", "20.00", "FAIL"))
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Failed);
    assert_eq!(h.status(&payment_no).await, PaymentStatus::Failed);
    assert!(h.repo.outbox().all().await.is_empty());

    let outcome = h
        .service
        .handle_callback(h.callback(&payment_no, "WX-2", "20.00", "SUCCESS"))
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Succeeded);
    assert_eq!(h.repo.outbox().all().await.len(), 1);
}

#[tokio::test]
async fn transient_failure_releases_the_callback_claim() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    h.repo.set_fail_on_write(true);
    let cb = h.callback(&payment_no, "WX-1", "20.00", "SUCCESS");
    let err = h.service.handle_callback(cb.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    h.repo.set_fail_on_write(false);
    let outcome = h.service.handle_callback(cb).await.unwrap();
    assert_eq!(outcome, CallbackOutcome::Succeeded);
}

#[tokio::test]
async fn in_flight_callback_reports_busy() {
    let h = TestHarness::new();
    let payment_no = h.create().await;
    h.kv
        .set(
            &format!("payment:callback:idempotent:{payment_no}:WX-1"),
            "PROCESSING",
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let err = h
        .service
        .handle_callback(h.callback(&payment_no, "WX-1", "20.00", "SUCCESS"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
}

#[tokio::test]
async fn sweeper_closes_expired_payments_and_late_success_still_lands() {
    let h = TestHarness::expiring();
    let payment_no = h.create().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let sweeper = ExpiredPaymentSweeper::new(h.service.clone(), SweeperConfig::default());
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.status(&payment_no).await, PaymentStatus::Closed);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    let actions: Vec<_> = h
        .service
        .payment_logs(&payment_no)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.action)
        .collect();
    assert_eq!(actions, vec![PaymentLogAction::Create, PaymentLogAction::Close]);

    // The channel took the money anyway; the order side decides what happens.
    let outcome = h
        .service
        .handle_callback(h.callback(&payment_no, "WX-9", "20.00", "SUCCESS"))
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Succeeded);
    assert_eq!(h.repo.outbox().all().await.len(), 1);
}

#[tokio::test]
async fn query_payment_logs_the_lookup() {
    let h = TestHarness::new();
    let payment_no = h.create().await;

    let (status, trade_no) = h.service.query_payment(&payment_no).await.unwrap();
    assert_eq!(status, PaymentStatus::Pending);
    assert!(trade_no.is_none());
    let logs = h.service.payment_logs(&payment_no).await.unwrap();
    assert_eq!(logs.last().unwrap().action, PaymentLogAction::Query);

    let err = h.service.get_payment("intruder", &payment_no).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
}

#[tokio::test]
async fn dispatcher_publishes_payment_succeeded_keyed_by_order() {
    let h = TestHarness::new();
    let payment_no = h.create().await;
    h.service
        .handle_callback(h.callback(&payment_no, "WX-1", "20.00", "SUCCESS"))
        .await
        .unwrap();

    let broker = InMemoryBroker::new();
    let dispatcher = OutboxDispatcher::new(
        "payment",
        Arc::new(h.repo.outbox()),
        Arc::new(broker.clone()),
        DispatcherConfig::default(),
    )
    .with_route(
        PaymentSucceeded::EVENT_TYPE,
        Route::topic(topics::PAYMENT_SUCCESS_NOTIFY),
    );
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.sent, 1);

    let published = broker.published(topics::PAYMENT_SUCCESS_NOTIFY).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some(ORDER));
    let event: PaymentSucceeded = published[0].decode().unwrap();
    assert_eq!(event.payment_no, payment_no);
}
