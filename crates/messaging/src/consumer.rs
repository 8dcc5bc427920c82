//! The consumer loop every subscriber runs.
//!
//! Failed messages are retried in place so later messages for the same
//! partition never overtake them. After the last attempt the message is
//! dead-lettered: logged as an operational alert and skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::{BrokerError, Message, Subscription};

/// Outcome of a failed delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth retrying: storage or peer hiccup.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed: undecodable payload or impossible state.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(_) | BrokerError::Closed => {
                HandlerError::Transient(err.to_string())
            }
            _ => HandlerError::Rejected(err.to_string()),
        }
    }
}

/// A subscriber's message handler. Must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub max_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Runs until shutdown is signalled or the subscription closes.
pub async fn run_consumer(
    mut subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        consumer = handler.name(),
        topic = subscription.topic(),
        group = subscription.group(),
        "consumer started"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = subscription.recv() => match received {
                Ok(message) => deliver(handler.as_ref(), &message, &config).await,
                Err(_) => {
                    tracing::warn!(consumer = handler.name(), "subscription closed");
                    break;
                }
            },
        }
    }

    tracing::info!(consumer = handler.name(), "consumer stopped");
}

/// Handles every message already queued on the subscription and returns how
/// many were taken. Used to drive consumers deterministically.
pub async fn process_pending(
    subscription: &mut Subscription,
    handler: &dyn MessageHandler,
    config: &ConsumerConfig,
) -> usize {
    let mut count = 0;
    while let Some(message) = subscription.try_recv() {
        deliver(handler, &message, config).await;
        count += 1;
    }
    count
}

async fn deliver(handler: &dyn MessageHandler, message: &Message, config: &ConsumerConfig) {
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        match handler.handle(message).await {
            Ok(()) => {
                metrics::counter!("consumer_messages_total", "consumer" => handler.name(), "outcome" => "ok").increment(1);
                return;
            }
            Err(HandlerError::Rejected(reason)) => {
                dead_letter(handler.name(), message, &reason);
                return;
            }
            Err(HandlerError::Transient(reason)) if attempt == attempts => {
                dead_letter(handler.name(), message, &reason);
                return;
            }
            Err(HandlerError::Transient(reason)) => {
                tracing::warn!(
                    consumer = handler.name(),
                    message_id = %message.id,
                    attempt,
                    %reason,
                    "handler failed, retrying"
                );
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
        }
    }
}

fn dead_letter(consumer: &'static str, message: &Message, reason: &str) {
    metrics::counter!("consumer_messages_total", "consumer" => consumer, "outcome" => "dead_letter").increment(1);
    metrics::counter!("operational_alerts_total", "alert" => "consumer_dead_letter").increment(1);
    tracing::error!(
        alert = "consumer_dead_letter",
        consumer,
        message_id = %message.id,
        event_type = %message.event_type,
        aggregate_id = %message.aggregate_id,
        %reason,
        "message dropped after failed delivery"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBroker, MessageBroker};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Recording {
        seen: Mutex<Vec<i64>>,
        failures_left: AtomicU32,
        reject: bool,
    }

    impl Recording {
        fn new(failures: u32, reject: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(failures),
                reject,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
            if self.reject {
                return Err(HandlerError::Rejected("bad payload".into()));
            }
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::Transient("db down".into()));
            }
            let n = message.payload["n"].as_i64().unwrap_or_default();
            self.seen.lock().unwrap().push(n);
            Ok(())
        }
    }

    fn msg(n: i64) -> Message {
        Message::builder()
            .event_type("test.event")
            .aggregate_id("a")
            .key("k")
            .payload_raw(serde_json::json!({ "n": n }))
            .build()
            .unwrap()
    }

    fn fast() -> ConsumerConfig {
        ConsumerConfig {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retried_in_order() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t", "g").await.unwrap();
        broker.publish("t", msg(1)).await.unwrap();
        broker.publish("t", msg(2)).await.unwrap();

        let handler = Recording::new(2, false);
        assert_eq!(process_pending(&mut sub, &handler, &fast()).await, 2);
        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_message() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t", "g").await.unwrap();
        broker.publish("t", msg(1)).await.unwrap();
        broker.publish("t", msg(2)).await.unwrap();

        let handler = Recording::new(3, false);
        process_pending(&mut sub, &handler, &fast()).await;
        assert_eq!(*handler.seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_rejected_not_retried() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t", "g").await.unwrap();
        broker.publish("t", msg(1)).await.unwrap();

        let handler = Recording::new(0, true);
        assert_eq!(process_pending(&mut sub, &handler, &fast()).await, 1);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_consumer_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe("t", "g").await.unwrap();
        let handler = Arc::new(Recording::new(0, false));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_consumer(sub, handler.clone(), fast(), rx));
        broker.publish("t", msg(7)).await.unwrap();

        for _ in 0..50 {
            if !handler.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(*handler.seen.lock().unwrap(), vec![7]);
    }
}
