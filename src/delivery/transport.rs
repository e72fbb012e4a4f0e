//! Transport abstraction over the messaging backend
//!
//! A transport owns the actual connection (loopback, MQTT, HTTP bridge). It
//! never touches shared state directly: connection transitions and inbound
//! messages are reported as [`TransportEvent`]s on the channel handed over in
//! [`Transport::connect`].

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::QoS;

/// Events emitted by a transport's own event loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The backend acknowledged the connection
    Connected,

    /// The connection was lost or closed
    Disconnected,

    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Authentication material for the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Backend unreachable or connection lost
    Unavailable(String),

    /// Backend reachable but refused the request
    Rejected(String),

    /// Operation not offered by this transport
    Unsupported(&'static str),

    /// Broker address could not be understood
    InvalidEndpoint(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            TransportError::Rejected(msg) => write!(f, "backend rejected request: {msg}"),
            TransportError::Unsupported(op) => write!(f, "unsupported by transport: {op}"),
            TransportError::InvalidEndpoint(msg) => write!(f, "invalid broker endpoint: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Connect/subscribe/publish primitives of a messaging client
///
/// ## Contract
///
/// - `connect` starts a connection attempt and returns once it has been
///   initiated; acknowledgement arrives later as [`TransportEvent::Connected`].
/// - `publish` must not block on acknowledgements beyond what the QoS level
///   requires of the underlying client.
/// - `disconnect` emits [`TransportEvent::Disconnected`] and drops the event
///   sender so the consumer observes the end of the stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
        events: EventSender,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
