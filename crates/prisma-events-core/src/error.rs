//! Error types for prisma-events

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Listener error: {0}")]
    ListenerError(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Malformed event envelope: {0}")]
    EnvelopeError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, EventsError>;

impl From<anyhow::Error> for EventsError {
    fn from(err: anyhow::Error) -> Self {
        EventsError::InternalError(err.to_string())
    }
}
