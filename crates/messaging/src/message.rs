use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::schema::EventSchema;
use crate::{BrokerError, Result};

/// A message travelling through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: EntityId,

    /// The type of the event (e.g., "payment.succeeded").
    pub event_type: String,

    /// Identifier of the aggregate the event describes.
    pub aggregate_id: String,

    /// Partition key. Messages sharing a key are delivered in publish order.
    pub key: Option<String>,

    /// Schema version the payload was written with.
    pub schema_version: u16,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl Message {
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Builds a message from a typed event, keyed by its aggregate.
    pub fn from_event<E: EventSchema>(event: &E) -> Result<Message> {
        let aggregate_id = event.aggregate_id();
        Message::builder()
            .event_type(event.event_type())
            .aggregate_id(aggregate_id.clone())
            .key(event.partition_key())
            .schema_version(E::VERSION)
            .payload(event)?
            .build()
    }

    /// Decodes the payload into a typed event, checking type and version.
    pub fn decode<E: EventSchema>(&self) -> Result<E> {
        if !E::EVENT_TYPES.contains(&self.event_type.as_str()) {
            return Err(BrokerError::UnexpectedEventType {
                actual: self.event_type.clone(),
                expected: E::EVENT_TYPES,
            });
        }
        if self.schema_version > E::VERSION {
            return Err(BrokerError::UnsupportedVersion {
                event_type: self.event_type.clone(),
                version: self.schema_version,
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Builder for constructing messages.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    id: Option<EntityId>,
    event_type: Option<String>,
    aggregate_id: Option<String>,
    key: Option<String>,
    schema_version: Option<u16>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

impl MessageBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the schema version. Defaults to 1.
    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn build(self) -> Result<Message> {
        Ok(Message {
            id: self.id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(BrokerError::MissingField("event_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(BrokerError::MissingField("aggregate_id"))?,
            key: self.key,
            schema_version: self.schema_version.unwrap_or(1),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(BrokerError::MissingField("payload"))?,
        })
    }
}
