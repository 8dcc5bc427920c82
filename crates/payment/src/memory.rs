use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox::{InMemoryOutboxStore, OutboxEntry, OutboxStore};
use tokio::sync::RwLock;

use crate::{
    CallbackUpdate, Payment, PaymentError, PaymentLog, PaymentRepository, PaymentStatus, Result,
};

#[derive(Default)]
struct State {
    payments: HashMap<String, Payment>,
    logs: Vec<PaymentLog>,
}

/// In-memory payment repository.
///
/// Owns an [`InMemoryOutboxStore`] so callback updates and their outbox rows
/// land together under one write lock.
#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    state: Arc<RwLock<State>>,
    outbox: InMemoryOutboxStore,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbox written alongside successful callbacks.
    pub fn outbox(&self) -> InMemoryOutboxStore {
        self.outbox.clone()
    }

    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment, log: &PaymentLog) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let open_exists = payment.status.is_open()
            && state
                .payments
                .values()
                .any(|p| p.order_no == payment.order_no && p.status.is_open());
        if open_exists || state.payments.contains_key(&payment.payment_no) {
            return Err(PaymentError::DuplicatePayment(payment.order_no.clone()));
        }
        state
            .payments
            .insert(payment.payment_no.clone(), payment.clone());
        state.logs.push(log.clone());
        Ok(())
    }

    async fn get(&self, payment_no: &str) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(payment_no).cloned())
    }

    async fn find_by_order(&self, order_no: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.order_no == order_no)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.payment_no.cmp(&b.payment_no))
            })
            .cloned())
    }

    async fn find_by_trade_no(&self, trade_no: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.trade_no.as_deref() == Some(trade_no))
            .cloned())
    }

    async fn apply_callback(
        &self,
        update: &CallbackUpdate,
        log: &PaymentLog,
        outbox: Option<&OutboxEntry>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let taken = state.payments.values().any(|p| {
            p.payment_no != update.payment_no && p.trade_no.as_deref() == Some(&update.trade_no)
        });
        if taken {
            return Err(PaymentError::TradeNoInUse(update.trade_no.clone()));
        }

        let current = state
            .payments
            .get(&update.payment_no)
            .is_some_and(|p| p.status == update.from && p.version == update.expected_version);
        if !current {
            return Err(PaymentError::StaleState(update.payment_no.clone()));
        }
        if let Some(entry) = outbox {
            self.outbox.insert(entry.clone()).await?;
        }
        if let Some(p) = state.payments.get_mut(&update.payment_no) {
            p.status = update.to;
            p.trade_no = Some(update.trade_no.clone());
            if update.paid_at.is_some() {
                p.paid_at = update.paid_at;
            }
            p.updated_at = Utc::now();
            p.version += 1;
        }
        state.logs.push(log.clone());
        Ok(())
    }

    async fn close(
        &self,
        payment_no: &str,
        expected_version: i64,
        at: DateTime<Utc>,
        log: &PaymentLog,
    ) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        match state.payments.get_mut(payment_no) {
            Some(p) if p.status.is_open() && p.version == expected_version => {
                p.status = PaymentStatus::Closed;
                p.updated_at = at;
                p.version += 1;
            }
            _ => return Err(PaymentError::StaleState(payment_no.to_string())),
        }
        state.logs.push(log.clone());
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut expired: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status.is_open() && p.expired_at < now)
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.expired_at.cmp(&b.expired_at));
        expired.truncate(limit);
        Ok(expired)
    }

    async fn append_log(&self, log: &PaymentLog) -> Result<()> {
        self.check_writable()?;
        self.state.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn logs_for(&self, payment_no: &str) -> Result<Vec<PaymentLog>> {
        Ok(self
            .state
            .read()
            .await
            .logs
            .iter()
            .filter(|l| l.payment_no == payment_no)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PaymentChannel, PaymentLogAction};
    use common::{EntityId, Money};
    use outbox::OutboxStatus;

    fn payment(payment_no: &str, order_no: &str) -> Payment {
        let now = Utc::now();
        Payment {
            id: EntityId::new(),
            payment_no: payment_no.into(),
            order_no: order_no.into(),
            user_id: "u1".into(),
            amount: Money::from_cents(2000),
            channel: PaymentChannel::WeChat,
            status: PaymentStatus::Pending,
            trade_no: None,
            notify_url: String::new(),
            return_url: String::new(),
            paid_at: None,
            expired_at: now + chrono::Duration::minutes(30),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn log(payment_no: &str) -> PaymentLog {
        PaymentLog::new(
            payment_no,
            PaymentLogAction::Create,
            None,
            PaymentStatus::Pending,
            "",
        )
    }

    fn success(payment_no: &str, trade_no: &str) -> CallbackUpdate {
        CallbackUpdate {
            payment_no: payment_no.into(),
            expected_version: 0,
            from: PaymentStatus::Pending,
            to: PaymentStatus::Success,
            trade_no: trade_no.into(),
            paid_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_one_open_payment_per_order() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(&payment("P1", "O1"), &log("P1")).await.unwrap();
        let err = repo
            .insert(&payment("P2", "O1"), &log("P2"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DuplicatePayment(_)));
        repo.insert(&payment("P3", "O2"), &log("P3")).await.unwrap();
    }

    #[tokio::test]
    async fn test_callback_is_conditional_and_writes_outbox() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(&payment("P1", "O1"), &log("P1")).await.unwrap();
        let entry = OutboxEntry::builder()
            .event_type("payment.succeeded")
            .aggregate_id("P1")
            .payload_raw("{}")
            .build()
            .unwrap();

        repo.apply_callback(&success("P1", "T1"), &log("P1"), Some(&entry))
            .await
            .unwrap();
        let err = repo
            .apply_callback(&success("P1", "T1"), &log("P1"), Some(&entry))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::StaleState(_)));

        assert_eq!(repo.outbox().count_by_status(OutboxStatus::Pending).await, 1);
        let p = repo.get("P1").await.unwrap().unwrap();
        assert_eq!(p.status, PaymentStatus::Success);
        assert_eq!(p.version, 1);
        assert_eq!(repo.logs_for("P1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trade_no_is_unique_across_payments() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(&payment("P1", "O1"), &log("P1")).await.unwrap();
        repo.insert(&payment("P2", "O2"), &log("P2")).await.unwrap();
        repo.apply_callback(&success("P1", "T1"), &log("P1"), None)
            .await
            .unwrap();

        let err = repo
            .apply_callback(&success("P2", "T1"), &log("P2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TradeNoInUse(_)));
    }

    #[tokio::test]
    async fn test_find_expired_skips_closed() {
        let repo = InMemoryPaymentRepository::new();
        let mut old = payment("P1", "O1");
        old.expired_at = Utc::now() - chrono::Duration::minutes(1);
        repo.insert(&old, &log("P1")).await.unwrap();
        repo.insert(&payment("P2", "O2"), &log("P2")).await.unwrap();

        let expired = repo.find_expired(Utc::now(), 10).await.unwrap();
        assert_eq!(expired.len(), 1);

        repo.close("P1", 0, Utc::now(), &log("P1")).await.unwrap();
        assert!(repo.find_expired(Utc::now(), 10).await.unwrap().is_empty());
    }
}
