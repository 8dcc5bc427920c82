use common::ErrorKind;
use thiserror::Error;

/// Errors that can occur when publishing or consuming messages.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not accept the message.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The subscription channel was closed.
    #[error("Subscription closed")]
    Closed,

    /// A required field was not set on the message builder.
    #[error("Message field `{0}` is required")]
    MissingField(&'static str),

    /// The payload was written with a schema version this build does not understand.
    #[error("Unsupported schema version {version} for {event_type}")]
    UnsupportedVersion { event_type: String, version: u16 },

    /// The message does not carry the expected event type.
    #[error("Unexpected event type {actual}, expected one of {expected:?}")]
    UnexpectedEventType {
        actual: String,
        expected: &'static [&'static str],
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Unavailable(_) | BrokerError::Closed => ErrorKind::Upstream,
            BrokerError::UnsupportedVersion { .. } | BrokerError::UnexpectedEventType { .. } => {
                ErrorKind::Validation
            }
            BrokerError::MissingField(_) | BrokerError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
