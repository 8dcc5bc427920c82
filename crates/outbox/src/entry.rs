use chrono::{DateTime, Utc};
use common::EntityId;
use messaging::EventSchema;
use serde::{Deserialize, Serialize};

use crate::{OutboxError, Result};

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    /// Stored column value.
    pub fn code(&self) -> i16 {
        match self {
            OutboxStatus::Pending => 0,
            OutboxStatus::Sent => 1,
            OutboxStatus::Failed => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OutboxStatus::Pending),
            1 => Some(OutboxStatus::Sent),
            2 => Some(OutboxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event waiting to be published.
///
/// The payload is kept as JSON text so the dispatcher decodes it once into
/// an untyped value before handing it to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EntityId,
    pub event_type: String,
    pub aggregate_id: String,
    /// Broker partition key; falls back to the aggregate id.
    pub partition_key: Option<String>,
    pub schema_version: u16,
    pub payload: String,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn builder() -> OutboxEntryBuilder {
        OutboxEntryBuilder::default()
    }

    /// Builds a pending entry from a typed event.
    pub fn for_event<E: EventSchema>(event: &E) -> Result<OutboxEntry> {
        OutboxEntry::builder()
            .event_type(event.event_type())
            .aggregate_id(event.aggregate_id())
            .partition_key(event.partition_key())
            .schema_version(E::VERSION)
            .payload(event)?
            .build()
    }
}

/// Builder for constructing outbox entries.
#[derive(Debug, Default)]
pub struct OutboxEntryBuilder {
    id: Option<EntityId>,
    event_type: Option<String>,
    aggregate_id: Option<String>,
    partition_key: Option<String>,
    schema_version: Option<u16>,
    payload: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl OutboxEntryBuilder {
    /// Sets the entry ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_string(payload)?);
        Ok(self)
    }

    /// Sets the payload from JSON text.
    pub fn payload_raw(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn build(self) -> Result<OutboxEntry> {
        let missing = |field: &str| OutboxError::Corrupt(format!("missing {field}"));
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(OutboxEntry {
            id: self.id.unwrap_or_default(),
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            aggregate_id: self.aggregate_id.ok_or_else(|| missing("aggregate_id"))?,
            partition_key: self.partition_key,
            schema_version: self.schema_version.unwrap_or(1),
            payload: self.payload.ok_or_else(|| missing("payload"))?,
            status: OutboxStatus::Pending,
            retry_count: 0,
            error_msg: None,
            created_at,
            updated_at: created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::OrderTimeout;

    #[test]
    fn test_status_codes() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Sent,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OutboxStatus::from_code(9), None);
    }

    #[test]
    fn test_for_event_is_pending() {
        let event = OrderTimeout {
            order_no: "0120250101000012345600".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
        };
        let entry = OutboxEntry::for_event(&event).unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.event_type, "order.timeout");
        assert_eq!(entry.aggregate_id, event.order_no);
        let back: OrderTimeout = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_builder_requires_event_type() {
        let err = OutboxEntry::builder()
            .aggregate_id("a")
            .payload_raw("{}")
            .build()
            .unwrap_err();
        assert!(matches!(err, OutboxError::Corrupt(_)));
    }
}
