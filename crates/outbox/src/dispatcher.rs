//! Drains an outbox into the broker.
//!
//! Each tick first retries failed rows below the retry cap, then sends
//! pending rows, oldest first. Once a row for an aggregate fails, later rows
//! for that aggregate wait for the next tick so per-aggregate order holds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use messaging::{Message, MessageBroker};
use tokio::sync::watch;

use crate::{OutboxEntry, OutboxStore, Result};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub send_timeout: Duration,
    pub max_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 100,
            send_timeout: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

/// Where an event type is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub topic: String,
    /// Delivery delay, for delayed-notification topics.
    pub delay: Option<Duration>,
}

impl Route {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            delay: None,
        }
    }

    pub fn delayed(topic: impl Into<String>, delay: Duration) -> Self {
        Self {
            topic: topic.into(),
            delay: Some(delay),
        }
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Rows held back behind an earlier failure for the same aggregate.
    pub deferred: usize,
}

pub struct OutboxDispatcher {
    service: &'static str,
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    routes: HashMap<String, Route>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(
        service: &'static str,
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            service,
            store,
            broker,
            routes: HashMap::new(),
            config,
        }
    }

    pub fn with_route(mut self, event_type: impl Into<String>, route: Route) -> Self {
        self.routes.insert(event_type.into(), route);
        self
    }

    /// Ticks until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(service = self.service, interval_secs = self.config.interval.as_secs(), "outbox dispatcher started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        tracing::warn!(service = self.service, error = %e, "outbox dispatch pass failed");
                    }
                }
            }
        }

        tracing::info!(service = self.service, "outbox dispatcher stopped");
    }

    /// One pass over the outbox.
    #[tracing::instrument(skip(self), fields(service = self.service))]
    pub async fn dispatch_once(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        let retryable = self
            .store
            .fetch_retryable(self.config.batch_size, self.config.max_retries)
            .await?;
        for entry in retryable {
            self.process(entry, &mut blocked, &mut report).await?;
        }

        let pending = self.store.fetch_pending(self.config.batch_size).await?;
        for entry in pending {
            self.process(entry, &mut blocked, &mut report).await?;
        }

        if report.sent + report.failed > 0 {
            tracing::debug!(
                sent = report.sent,
                failed = report.failed,
                deferred = report.deferred,
                "outbox pass complete"
            );
        }
        Ok(report)
    }

    async fn process(
        &self,
        entry: OutboxEntry,
        blocked: &mut HashSet<String>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        if blocked.contains(&entry.aggregate_id) {
            report.deferred += 1;
            return Ok(());
        }

        match self.send(&entry).await {
            Ok(()) => {
                self.store.mark_sent(entry.id).await?;
                metrics::counter!("outbox_dispatched_total", "service" => self.service).increment(1);
                report.sent += 1;
            }
            Err(reason) => {
                let retries = self.store.mark_failed(entry.id, &reason).await?;
                metrics::counter!("outbox_failed_total", "service" => self.service).increment(1);
                report.failed += 1;
                blocked.insert(entry.aggregate_id.clone());

                if retries >= self.config.max_retries {
                    metrics::counter!("operational_alerts_total", "alert" => "outbox_retry_exhausted").increment(1);
                    tracing::error!(
                        alert = "outbox_retry_exhausted",
                        service = self.service,
                        entry_id = %entry.id,
                        event_type = %entry.event_type,
                        aggregate_id = %entry.aggregate_id,
                        retries,
                        %reason,
                        "outbox entry will not be retried"
                    );
                } else {
                    tracing::warn!(
                        service = self.service,
                        entry_id = %entry.id,
                        event_type = %entry.event_type,
                        retries,
                        %reason,
                        "outbox send failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Sends one entry. Errors are flattened to the text stored on the row.
    async fn send(&self, entry: &OutboxEntry) -> std::result::Result<(), String> {
        let route = self
            .routes
            .get(&entry.event_type)
            .ok_or_else(|| format!("no route for event type {}", entry.event_type))?;

        let payload: serde_json::Value =
            serde_json::from_str(&entry.payload).map_err(|e| format!("payload: {e}"))?;
        let message = Message::builder()
            .id(entry.id)
            .event_type(entry.event_type.clone())
            .aggregate_id(entry.aggregate_id.clone())
            .key(
                entry
                    .partition_key
                    .clone()
                    .unwrap_or_else(|| entry.aggregate_id.clone()),
            )
            .schema_version(entry.schema_version)
            .timestamp(entry.created_at)
            .payload_raw(payload)
            .build()
            .map_err(|e| e.to_string())?;

        let publish = async {
            match route.delay {
                Some(delay) => {
                    self.broker
                        .publish_delayed(&route.topic, message, delay)
                        .await
                }
                None => self.broker.publish(&route.topic, message).await,
            }
        };

        match tokio::time::timeout(self.config.send_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "send timed out after {}ms",
                self.config.send_timeout.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOutboxStore, OutboxStatus};
    use messaging::InMemoryBroker;

    fn entry(event_type: &str, aggregate: &str, n: i32) -> OutboxEntry {
        OutboxEntry::builder()
            .event_type(event_type)
            .aggregate_id(aggregate)
            .payload_raw(format!(r#"{{"n":{n}}}"#))
            .build()
            .unwrap()
    }

    fn dispatcher(store: &InMemoryOutboxStore, broker: &InMemoryBroker) -> OutboxDispatcher {
        OutboxDispatcher::new(
            "test",
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            DispatcherConfig {
                max_retries: 2,
                ..DispatcherConfig::default()
            },
        )
        .with_route("thing.happened", Route::topic("things"))
    }

    #[tokio::test]
    async fn test_sends_pending_in_order() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        for n in 0..3 {
            store.insert(entry("thing.happened", "a", n)).await.unwrap();
        }

        let report = dispatcher(&store, &broker).dispatch_once().await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(store.count_by_status(OutboxStatus::Sent).await, 3);

        let published = broker.published("things").await;
        let ns: Vec<_> = published.iter().map(|m| m.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
        // Payload is an object, not a re-encoded string.
        assert!(published[0].payload.is_object());
    }

    #[tokio::test]
    async fn test_message_id_matches_entry() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        let e = entry("thing.happened", "a", 1);
        let id = e.id;
        store.insert(e).await.unwrap();

        dispatcher(&store, &broker).dispatch_once().await.unwrap();
        assert_eq!(broker.published("things").await[0].id, id);
    }

    #[tokio::test]
    async fn test_failure_then_retry() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        let d = dispatcher(&store, &broker);
        store.insert(entry("thing.happened", "a", 1)).await.unwrap();

        broker.set_fail_on_publish(true);
        let report = d.dispatch_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.count_by_status(OutboxStatus::Failed).await, 1);

        broker.set_fail_on_publish(false);
        let report = d.dispatch_once().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(store.count_by_status(OutboxStatus::Sent).await, 1);
    }

    #[tokio::test]
    async fn test_failed_aggregate_defers_later_rows() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        let d = dispatcher(&store, &broker);
        store.insert(entry("unrouted", "a", 1)).await.unwrap();
        store.insert(entry("thing.happened", "a", 2)).await.unwrap();
        store.insert(entry("thing.happened", "b", 3)).await.unwrap();

        let report = d.dispatch_once().await.unwrap();
        assert_eq!(
            report,
            DispatchReport {
                sent: 1,
                failed: 1,
                deferred: 1
            }
        );
        assert_eq!(store.count_by_status(OutboxStatus::Pending).await, 1);
    }

    #[tokio::test]
    async fn test_retry_cap_stops_retries() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        let d = dispatcher(&store, &broker);
        store.insert(entry("unrouted", "a", 1)).await.unwrap();

        d.dispatch_once().await.unwrap();
        d.dispatch_once().await.unwrap();
        let report = d.dispatch_once().await.unwrap();
        assert_eq!(report, DispatchReport::default());

        let all = store.all().await;
        assert_eq!(all[0].retry_count, 2);
        assert!(all[0].error_msg.as_deref().unwrap().contains("no route"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_route() {
        let store = InMemoryOutboxStore::new();
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("later", "g").await.unwrap();
        let d = OutboxDispatcher::new(
            "test",
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            DispatcherConfig::default(),
        )
        .with_route("thing.later", Route::delayed("later", Duration::from_secs(60)));
        store.insert(entry("thing.later", "a", 1)).await.unwrap();

        assert_eq!(d.dispatch_once().await.unwrap().sent, 1);
        tokio::task::yield_now().await;
        assert!(sub.try_recv().is_none());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sub.recv().await.unwrap().payload["n"], 1);
    }
}
