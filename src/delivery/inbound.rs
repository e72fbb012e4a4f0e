//! Inbound message handling
//!
//! Messages arriving on the alert and status topics are decoded by the event
//! pump and queued; a dedicated dispatcher task drains the queue and hands
//! every message to the registered handlers. The transport's own event loop
//! therefore never runs handler code.
//!
//! ```text
//! transport ──TransportEvent──► pump ──decode──► queue ──► dispatcher ──► handlers
//!                                 │
//!                                 └── malformed payloads are logged and dropped
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, trace, warn};

use super::Topics;
use super::error::DecodeError;
use crate::messages::InboundMessage;

/// Receives decoded inbound messages
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage);
}

pub type HandlerRegistry = Arc<RwLock<Vec<Arc<dyn InboundHandler>>>>;

/// Logs every inbound alert and status update
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl InboundHandler for LoggingHandler {
    fn handle(&self, message: &InboundMessage) {
        match message {
            InboundMessage::Alert(alert) => warn!(
                sensor = %alert.sensor_id,
                location = %alert.location,
                temperature = alert.temperature,
                "alert received: {}",
                alert.message
            ),
            InboundMessage::Status(status) => {
                info!(status = ?status.status, "status update: {}", status.message)
            }
        }
    }
}

/// Decode a payload received on one of the subscribed topics
pub fn decode(topics: &Topics, topic: &str, payload: &[u8]) -> Result<InboundMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Utf8(e.to_string()))?;

    let json_error = |e: serde_json::Error| DecodeError::Json {
        topic: topic.to_string(),
        reason: e.to_string(),
    };

    if topic == topics.alerts {
        serde_json::from_str(text)
            .map(InboundMessage::Alert)
            .map_err(json_error)
    } else if topic == topics.status {
        serde_json::from_str(text)
            .map(InboundMessage::Status)
            .map_err(json_error)
    } else {
        Err(DecodeError::UnknownTopic(topic.to_string()))
    }
}

/// Drain the inbound queue until every sender is gone
pub(super) async fn dispatch(mut inbound: mpsc::Receiver<InboundMessage>, handlers: HandlerRegistry) {
    debug!("starting inbound dispatcher");

    while let Some(message) = inbound.recv().await {
        let handlers = handlers.read().await.clone();
        trace!("dispatching inbound message to {} handlers", handlers.len());

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.handle(&message))).is_err() {
                error!("inbound handler panicked, message skipped for this handler");
            }
        }
    }

    debug!("inbound dispatcher stopped");
}
