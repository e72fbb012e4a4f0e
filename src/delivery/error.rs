//! Error types for the delivery channel

use std::fmt;
use std::time::Duration;

/// Result type alias for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while connecting or publishing
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The transport refused or failed the connection attempt
    ConnectFailed(String),

    /// The connection was not acknowledged before the deadline
    ConnectTimeout { timeout: Duration },

    /// Publish attempted while the channel is not connected
    NotConnected,

    /// The transport rejected the message
    Rejected(String),

    /// The payload could not be encoded
    Encode(String),
}

impl DeliveryError {
    /// Connection-class errors abort startup, publish-class errors are per message
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DeliveryError::ConnectFailed(_) | DeliveryError::ConnectTimeout { .. }
        )
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::ConnectFailed(msg) => write!(f, "failed to connect to broker: {msg}"),
            DeliveryError::ConnectTimeout { timeout } => {
                write!(f, "broker did not acknowledge connection within {timeout:?}")
            }
            DeliveryError::NotConnected => write!(f, "not connected to broker"),
            DeliveryError::Rejected(msg) => write!(f, "publish rejected by transport: {msg}"),
            DeliveryError::Encode(msg) => write!(f, "failed to encode payload: {msg}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Malformed message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not valid UTF-8
    Utf8(String),

    /// Payload is not the expected JSON shape
    Json { topic: String, reason: String },

    /// Message arrived on a topic no handler understands
    UnknownTopic(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Utf8(msg) => write!(f, "payload is not valid UTF-8: {msg}"),
            DecodeError::Json { topic, reason } => {
                write!(f, "malformed payload on {topic}: {reason}")
            }
            DecodeError::UnknownTopic(topic) => write!(f, "message on unexpected topic: {topic}"),
        }
    }
}

impl std::error::Error for DecodeError {}
