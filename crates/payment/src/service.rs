use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{EntityId, ErrorKind, Money, generate_payment_no};
use kv::{DistributedLock, KeyValueStore, LockSettings};
use messaging::PaymentSucceeded;
use outbox::OutboxEntry;

use crate::channel::pay_params;
use crate::{
    CallbackOutcome, CallbackRequest, CallbackUpdate, ChannelRegistry, CreatePaymentRequest,
    CreatePaymentResult, OrderClient, Payment, PaymentError, PaymentLog, PaymentLogAction,
    PaymentRepository, PaymentStatus, PaymentToken, Result, SignatureVerifier,
};

const CALLBACK_PROCESSING: &str = "PROCESSING";
const CALLBACK_SUCCESS: &str = "SUCCESS";
const DEFAULT_CLOSE_LIMIT: usize = 100;

/// Tunables for the payment service.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// How long a payment stays payable before the sweeper closes it.
    pub pay_timeout: Duration,
    pub token_ttl: Duration,
    /// Lifetime of the create-request correlation entry.
    pub correlation_ttl: Duration,
    /// How long a callback may hold its idempotency claim.
    pub callback_processing_ttl: Duration,
    /// How long a settled callback is remembered.
    pub callback_done_ttl: Duration,
    pub locks: LockSettings,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            pay_timeout: Duration::from_secs(1800),
            token_ttl: Duration::from_secs(300),
            correlation_ttl: Duration::from_secs(300),
            callback_processing_ttl: Duration::from_secs(300),
            callback_done_ttl: Duration::from_secs(24 * 60 * 60),
            locks: LockSettings::default(),
        }
    }
}

/// Payment lifecycle operations.
#[derive(Clone)]
pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderClient>,
    kv: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    channels: ChannelRegistry,
    verifier: Arc<dyn SignatureVerifier>,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderClient>,
        kv: Arc<dyn KeyValueStore>,
        channels: ChannelRegistry,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self::with_settings(repo, orders, kv, channels, verifier, PaymentSettings::default())
    }

    pub fn with_settings(
        repo: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderClient>,
        kv: Arc<dyn KeyValueStore>,
        channels: ChannelRegistry,
        verifier: Arc<dyn SignatureVerifier>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            repo,
            orders,
            lock: DistributedLock::new(kv.clone()),
            kv,
            channels,
            verifier,
            settings,
        }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    fn token_key(user_id: &str, token: &str) -> String {
        format!("payment:token:{user_id}:{token}")
    }

    fn correlation_key(user_id: &str, order_no: &str, token: &str) -> String {
        format!("payment:idempotent:{user_id}:{order_no}:{token}")
    }

    fn callback_key(payment_no: &str, trade_no: &str) -> String {
        format!("payment:callback:idempotent:{payment_no}:{trade_no}")
    }

    /// Issues a token bound to `order_no` that `create_payment` must present.
    #[tracing::instrument(skip(self))]
    pub async fn generate_payment_token(&self, user_id: &str, order_no: &str) -> Result<PaymentToken> {
        if user_id.trim().is_empty() || order_no.trim().is_empty() {
            return Err(PaymentError::Validation(
                "user_id and order_no are required".into(),
            ));
        }
        let token = EntityId::new().to_string();
        self.kv
            .set(
                &Self::token_key(user_id, &token),
                order_no,
                Some(self.settings.token_ttl),
            )
            .await?;
        Ok(PaymentToken {
            token,
            expires_in_secs: self.settings.token_ttl.as_secs(),
        })
    }

    /// Creates the order's payment, or returns the one already open for it.
    #[tracing::instrument(skip(self, req), fields(user_id = %req.user_id, order_no = %req.order_no))]
    pub async fn create_payment(&self, req: CreatePaymentRequest) -> Result<CreatePaymentResult> {
        if req.user_id.trim().is_empty() || req.order_no.trim().is_empty() {
            return Err(PaymentError::Validation(
                "user_id and order_no are required".into(),
            ));
        }
        if req.token.trim().is_empty() {
            return Err(PaymentError::Validation("payment token is required".into()));
        }

        let correlation = Self::correlation_key(&req.user_id, &req.order_no, &req.token);
        if let Some(existing) = self.correlated_payment(&correlation, &req.user_id).await? {
            return self.with_params(existing);
        }

        let bound_order = self
            .kv
            .get(&Self::token_key(&req.user_id, &req.token))
            .await?;
        if bound_order.as_deref() != Some(req.order_no.as_str()) {
            return Err(PaymentError::Validation(
                "payment token is invalid or expired".into(),
            ));
        }

        let lock_key = format!("payment:lock:{}", req.order_no);
        let Some(guard) = self
            .lock
            .try_acquire(&lock_key, self.settings.locks.payment_create_ttl)
            .await?
        else {
            return Err(PaymentError::Busy(
                "payment is being created, retry later".into(),
            ));
        };

        let result = self.create_payment_locked(&req, &correlation).await;
        self.lock.release(guard).await;

        if let Err(e) = &result {
            log_by_kind("create payment failed", e);
        }
        result
    }

    async fn create_payment_locked(
        &self,
        req: &CreatePaymentRequest,
        correlation: &str,
    ) -> Result<CreatePaymentResult> {
        if let Some(existing) = self.correlated_payment(correlation, &req.user_id).await? {
            return self.with_params(existing);
        }

        let order = self
            .orders
            .get_order(&req.order_no)
            .await?
            .filter(|o| o.user_id == req.user_id)
            .ok_or_else(|| PaymentError::NotFound(format!("order {}", req.order_no)))?;
        if !order.is_pending_pay {
            return Err(PaymentError::OrderNotPayable(req.order_no.clone()));
        }
        if !order.pay_amount.is_positive() {
            return Err(PaymentError::Validation(
                "order pay amount must be positive".into(),
            ));
        }

        if let Some(existing) = self.repo.find_by_order(&req.order_no).await? {
            if existing.status != PaymentStatus::Pending {
                return Err(PaymentError::AlreadyPaidOrClosed {
                    order_no: req.order_no.clone(),
                    status: existing.status,
                });
            }
            self.remember_correlation(correlation, &existing.payment_no)
                .await;
            return self.with_params(existing);
        }

        let config = self.channels.get(req.channel).ok_or_else(|| {
            PaymentError::Validation(format!("payment channel {} is not available", req.channel))
        })?;

        let now = Utc::now();
        let payment = Payment {
            id: EntityId::new(),
            payment_no: generate_payment_no(),
            order_no: order.order_no.clone(),
            user_id: order.user_id.clone(),
            amount: order.pay_amount,
            channel: req.channel,
            status: PaymentStatus::Pending,
            trade_no: None,
            notify_url: config.notify_url.clone(),
            return_url: if req.return_url.is_empty() {
                config.return_url.clone()
            } else {
                req.return_url.clone()
            },
            paid_at: None,
            expired_at: now + chrono_duration(self.settings.pay_timeout),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        let log = PaymentLog::new(
            &payment.payment_no,
            PaymentLogAction::Create,
            None,
            PaymentStatus::Pending,
            format!("channel={} amount={}", payment.channel, payment.amount),
        );

        let payment = match self.repo.insert(&payment, &log).await {
            Ok(()) => payment,
            Err(PaymentError::DuplicatePayment(_)) => {
                tracing::info!(order_no = %req.order_no, "payment created concurrently, returning winner");
                self.repo
                    .find_by_order(&req.order_no)
                    .await?
                    .ok_or_else(|| PaymentError::DuplicatePayment(req.order_no.clone()))?
            }
            Err(e) => return Err(e),
        };

        self.remember_correlation(correlation, &payment.payment_no)
            .await;
        metrics::counter!("payments_created_total", "channel" => payment.channel.as_str())
            .increment(1);
        tracing::info!(payment_no = %payment.payment_no, amount = %payment.amount, "payment created");
        self.with_params(payment)
    }

    async fn correlated_payment(&self, correlation: &str, user_id: &str) -> Result<Option<Payment>> {
        let Some(payment_no) = self.kv.get(correlation).await? else {
            return Ok(None);
        };
        Ok(self
            .repo
            .get(&payment_no)
            .await?
            .filter(|p| p.user_id == user_id))
    }

    async fn remember_correlation(&self, correlation: &str, payment_no: &str) {
        if let Err(e) = self
            .kv
            .set(correlation, payment_no, Some(self.settings.correlation_ttl))
            .await
        {
            tracing::warn!(payment_no, error = %e, "failed to cache payment correlation");
        }
    }

    fn with_params(&self, payment: Payment) -> Result<CreatePaymentResult> {
        let params = self
            .channels
            .get(payment.channel)
            .map(|config| pay_params(&payment, config))
            .unwrap_or_default();
        Ok(CreatePaymentResult {
            payment,
            pay_params: params,
        })
    }

    /// Applies a channel notification at most once per `(payment_no, trade_no)`.
    #[tracing::instrument(skip(self, callback), fields(payment_no = %callback.payment_no, trade_no = %callback.trade_no))]
    pub async fn handle_callback(&self, callback: CallbackRequest) -> Result<CallbackOutcome> {
        if callback.payment_no.trim().is_empty()
            || callback.trade_no.trim().is_empty()
            || callback.amount.trim().is_empty()
        {
            return Err(PaymentError::Validation(
                "payment_no, trade_no and amount are required".into(),
            ));
        }

        let key = Self::callback_key(&callback.payment_no, &callback.trade_no);
        match self.kv.get(&key).await?.as_deref() {
            Some(CALLBACK_SUCCESS) => return Ok(CallbackOutcome::AlreadyProcessed),
            Some(CALLBACK_PROCESSING) => {
                return Err(PaymentError::Busy("callback is being processed".into()));
            }
            Some(reason) => return Err(PaymentError::CallbackRejected(reason.to_string())),
            None => {}
        }
        if !self
            .kv
            .set_nx(&key, CALLBACK_PROCESSING, self.settings.callback_processing_ttl)
            .await?
        {
            return Err(PaymentError::Busy("callback is being processed".into()));
        }

        let lock_key = format!("payment:lock:{}", callback.payment_no);
        let guard = match self
            .lock
            .try_acquire(&lock_key, self.settings.locks.payment_callback_ttl)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                self.forget_callback(&key).await;
                return Err(PaymentError::Busy("payment is locked, retry later".into()));
            }
            Err(e) => {
                self.forget_callback(&key).await;
                return Err(e.into());
            }
        };

        let result = self.handle_callback_locked(&callback).await;
        self.lock.release(guard).await;

        match &result {
            Ok(CallbackOutcome::Failed) => {
                let reason = format!("channel reported status {}", callback.status);
                self.settle_callback(&key, &reason).await;
            }
            Ok(_) => self.settle_callback(&key, CALLBACK_SUCCESS).await,
            Err(e) if e.is_permanent_rejection() => {
                self.settle_callback(&key, &e.to_string()).await;
            }
            Err(_) => self.forget_callback(&key).await,
        }

        let outcome = match &result {
            Ok(CallbackOutcome::Succeeded) => "succeeded",
            Ok(CallbackOutcome::Failed) => "failed",
            Ok(CallbackOutcome::AlreadyProcessed) => "duplicate",
            Err(_) => "error",
        };
        metrics::counter!("payment_callbacks_total", "outcome" => outcome).increment(1);
        if let Err(e) = &result {
            log_by_kind("payment callback failed", e);
        }
        result
    }

    async fn handle_callback_locked(&self, callback: &CallbackRequest) -> Result<CallbackOutcome> {
        let payment = self
            .repo
            .get(&callback.payment_no)
            .await?
            .ok_or_else(|| PaymentError::NotFound(callback.payment_no.clone()))?;
        if !self.verifier.verify(callback) {
            tracing::warn!("callback signature rejected");
            return Err(PaymentError::InvalidSignature);
        }
        if payment.status == PaymentStatus::Success {
            tracing::debug!("payment already succeeded");
            return Ok(CallbackOutcome::AlreadyProcessed);
        }

        if let Some(other) = self.repo.find_by_trade_no(&callback.trade_no).await?
            && other.payment_no != payment.payment_no
        {
            metrics::counter!("operational_alerts_total", "alert" => "trade_no_reused").increment(1);
            tracing::error!(
                alert = "trade_no_reused",
                payment_no = %payment.payment_no,
                other_payment_no = %other.payment_no,
                trade_no = %callback.trade_no,
                "trade number already bound to another payment"
            );
            return Err(PaymentError::TradeNoInUse(callback.trade_no.clone()));
        }

        let amount: Money = callback
            .amount
            .parse()
            .map_err(|_| PaymentError::Validation(format!("invalid amount {}", callback.amount)))?;
        if amount != payment.amount {
            metrics::counter!("operational_alerts_total", "alert" => "payment_amount_mismatch")
                .increment(1);
            tracing::error!(
                alert = "payment_amount_mismatch",
                severity = "critical",
                payment_no = %payment.payment_no,
                expected = %payment.amount,
                callback_amount = %amount,
                "callback amount does not match payment"
            );
            return Err(PaymentError::AmountMismatch {
                expected: payment.amount.to_string(),
                callback: amount.to_string(),
            });
        }

        let to = PaymentStatus::from_callback_token(&callback.status);
        if !payment.status.can_transition_to(to) {
            return Err(PaymentError::Validation(format!(
                "payment {} is {} and cannot become {}",
                payment.payment_no, payment.status, to
            )));
        }
        if payment.status == PaymentStatus::Closed && to == PaymentStatus::Success {
            tracing::warn!(payment_no = %payment.payment_no, "success callback for a closed payment");
        }

        let now = Utc::now();
        let paid_at = (to == PaymentStatus::Success).then_some(now);
        let update = CallbackUpdate {
            payment_no: payment.payment_no.clone(),
            expected_version: payment.version,
            from: payment.status,
            to,
            trade_no: callback.trade_no.clone(),
            paid_at,
        };
        let log = PaymentLog::new(
            &payment.payment_no,
            PaymentLogAction::Callback,
            Some(payment.status),
            to,
            format!("trade_no={} status={}", callback.trade_no, callback.status),
        );
        let event = match paid_at {
            Some(paid_at) => Some(OutboxEntry::for_event(&PaymentSucceeded {
                payment_no: payment.payment_no.clone(),
                order_no: payment.order_no.clone(),
                user_id: payment.user_id.clone(),
                amount: payment.amount,
                channel: payment.channel.as_str().to_string(),
                trade_no: callback.trade_no.clone(),
                paid_at,
            })?),
            None => None,
        };

        self.repo
            .apply_callback(&update, &log, event.as_ref())
            .await?;

        if to == PaymentStatus::Success {
            tracing::info!(order_no = %payment.order_no, "payment succeeded");
            Ok(CallbackOutcome::Succeeded)
        } else {
            tracing::info!(status = %callback.status, "payment failed at channel");
            Ok(CallbackOutcome::Failed)
        }
    }

    async fn settle_callback(&self, key: &str, value: &str) {
        if let Err(e) = self
            .kv
            .set(key, value, Some(self.settings.callback_done_ttl))
            .await
        {
            tracing::warn!(key, error = %e, "failed to record callback result");
        }
    }

    async fn forget_callback(&self, key: &str) {
        if let Err(e) = self.kv.delete(key).await {
            tracing::warn!(key, error = %e, "failed to release callback claim");
        }
    }

    /// Current status and trade number. Records a `query` log row.
    #[tracing::instrument(skip(self))]
    pub async fn query_payment(&self, payment_no: &str) -> Result<(PaymentStatus, Option<String>)> {
        if payment_no.trim().is_empty() {
            return Err(PaymentError::Validation("payment_no is required".into()));
        }
        let payment = self
            .repo
            .get(payment_no)
            .await?
            .ok_or_else(|| PaymentError::NotFound(payment_no.to_string()))?;

        let log = PaymentLog::new(
            payment_no,
            PaymentLogAction::Query,
            Some(payment.status),
            payment.status,
            "",
        );
        if let Err(e) = self.repo.append_log(&log).await {
            tracing::debug!(error = %e, "failed to record query log");
        }
        Ok((payment.status, payment.trade_no))
    }

    /// Returns the user's payment. Another user's payment reads as not found.
    pub async fn get_payment(&self, user_id: &str, payment_no: &str) -> Result<Payment> {
        if payment_no.trim().is_empty() {
            return Err(PaymentError::Validation("payment_no is required".into()));
        }
        self.repo
            .get(payment_no)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| PaymentError::NotFound(payment_no.to_string()))
    }

    /// Audit trail for one payment.
    pub async fn payment_logs(&self, payment_no: &str) -> Result<Vec<PaymentLog>> {
        self.repo.logs_for(payment_no).await
    }

    /// Closes open payments past their expiry. Returns how many were closed.
    ///
    /// Inventory is not touched: the order's own timeout releases it.
    #[tracing::instrument(skip(self))]
    pub async fn close_expired(&self, limit: usize) -> Result<usize> {
        let limit = if limit == 0 { DEFAULT_CLOSE_LIMIT } else { limit };
        let now = Utc::now();
        let expired = self.repo.find_expired(now, limit).await?;

        let mut closed = 0;
        for payment in &expired {
            let log = PaymentLog::new(
                &payment.payment_no,
                PaymentLogAction::Close,
                Some(payment.status),
                PaymentStatus::Closed,
                "expired",
            );
            match self
                .repo
                .close(&payment.payment_no, payment.version, now, &log)
                .await
            {
                Ok(()) => closed += 1,
                Err(PaymentError::StaleState(_)) => {
                    tracing::debug!(payment_no = %payment.payment_no, "payment changed before close");
                }
                Err(e) => {
                    tracing::warn!(payment_no = %payment.payment_no, error = %e, "failed to close expired payment");
                }
            }
        }

        if closed > 0 {
            metrics::counter!("payments_closed_total").increment(closed as u64);
            tracing::info!(closed, "expired payments closed");
        }
        Ok(closed)
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn log_by_kind(msg: &str, e: &PaymentError) {
    match e.kind() {
        ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::StaleState => {
            tracing::debug!(error = %e, "{msg}")
        }
        ErrorKind::Busy | ErrorKind::InsufficientStock | ErrorKind::RetryClient | ErrorKind::Conflict => {
            tracing::info!(error = %e, "{msg}")
        }
        ErrorKind::Upstream => tracing::warn!(error = %e, "{msg}"),
        ErrorKind::Internal => tracing::error!(error = %e, "{msg}"),
    }
}
