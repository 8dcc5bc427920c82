use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BrokerError, Message, Result};

/// Core trait for the message broker.
///
/// Delivery is at-least-once. Messages sharing a partition key are delivered
/// to a consumer group in publish order; nothing is promised across keys.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a message for immediate delivery.
    async fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// Publishes a message that becomes visible after `delay`.
    async fn publish_delayed(&self, topic: &str, message: Message, delay: Duration) -> Result<()>;

    /// Joins a consumer group on a topic.
    ///
    /// Every group receives every message; within a group each message goes
    /// to exactly one member, chosen by partition key.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription>;
}

/// A consumer's handle on its share of a topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    group: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Waits for the next message. Fails with `Closed` once the broker is gone.
    pub async fn recv(&mut self) -> Result<Message> {
        self.receiver.recv().await.ok_or(BrokerError::Closed)
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}
