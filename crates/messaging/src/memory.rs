use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{BrokerError, Message, MessageBroker, Result, Subscription};

#[derive(Default)]
struct Group {
    members: Vec<mpsc::UnboundedSender<Message>>,
}

impl Group {
    /// Sends to the member owning the message's partition. Members whose
    /// receiver was dropped are pruned first.
    fn deliver(&mut self, message: &Message) -> bool {
        self.members.retain(|tx| !tx.is_closed());
        if self.members.is_empty() {
            return false;
        }
        let slot = partition_slot(message, self.members.len());
        self.members[slot].send(message.clone()).is_ok()
    }
}

fn partition_slot(message: &Message, members: usize) -> usize {
    let key = message.key.as_deref().unwrap_or(&message.aggregate_id);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % members as u64) as usize
}

#[derive(Default)]
struct Topic {
    groups: HashMap<String, Group>,
    /// Messages published before any group joined.
    backlog: Vec<Message>,
    published: Vec<Message>,
}

/// In-memory broker for tests and single-process deployments.
///
/// Topics keep a backlog until the first group subscribes, so a consumer
/// started after a producer still sees earlier messages.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail with `Unavailable`.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Every message ever published to a topic, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<Message> {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    async fn route(&self, topic_name: &str, message: Message) {
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(topic_name.to_string()).or_default();
        topic.published.push(message.clone());

        if topic.groups.is_empty() {
            topic.backlog.push(message);
            return;
        }
        for (name, group) in topic.groups.iter_mut() {
            if !group.deliver(&message) {
                tracing::warn!(topic = topic_name, group = %name, message_id = %message.id, "no live consumer in group");
            }
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("simulated publish failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        self.check_available()?;
        tracing::debug!(topic, event_type = %message.event_type, message_id = %message.id, "publish");
        self.route(topic, message).await;
        Ok(())
    }

    async fn publish_delayed(&self, topic: &str, message: Message, delay: Duration) -> Result<()> {
        self.check_available()?;
        tracing::debug!(topic, event_type = %message.event_type, delay_ms = delay.as_millis() as u64, "publish delayed");
        let broker = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.route(&topic, message).await;
        });
        Ok(())
    }

    async fn subscribe(&self, topic_name: &str, group_name: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(topic_name.to_string()).or_default();
        let first_group = topic.groups.is_empty();

        let group = topic.groups.entry(group_name.to_string()).or_default();
        group.members.push(tx);

        if first_group {
            let backlog = std::mem::take(&mut topic.backlog);
            let group = topic.groups.entry(group_name.to_string()).or_default();
            for message in &backlog {
                group.deliver(message);
            }
        }

        Ok(Subscription::new(topic_name, group_name, rx))
    }
}
