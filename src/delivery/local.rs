//! In-process loopback broker
//!
//! `LocalBroker` implements [`Transport`] without any network. Published
//! messages are logged and echoed back to the session if it subscribed to the
//! topic, which mirrors how a real broker delivers a client's own messages on
//! topics it listens to.
//!
//! Clones share the same broker, so a test can keep one handle to inspect the
//! publish log or simulate an outage while the delivery channel owns another.
//! Only a broker built with [`LocalBroker::recording`] keeps a publish log;
//! [`LocalBroker::new`] forwards messages and forgets them.
//!
//! ## Limitations
//!
//! - **Single session**: one connected client at a time
//! - **Exact topics**: no wildcard subscriptions

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::QoS;
use super::transport::{Credentials, EventSender, Transport, TransportError, TransportEvent};

/// A message accepted by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

struct Session {
    events: EventSender,
    subscriptions: HashSet<String>,
}

struct BrokerState {
    available: bool,
    accepting: bool,
    acknowledging: bool,
    session: Option<Session>,
    recording: bool,
    published: Vec<PublishedMessage>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            available: true,
            accepting: true,
            acknowledging: true,
            session: None,
            recording: false,
            published: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that keeps every accepted message for inspection
    pub fn recording() -> Self {
        let broker = Self::default();
        broker.lock().recording = true;
        broker
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // State stays consistent even if a holder panicked; every mutation is a single step.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse (or accept again) new connection attempts
    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Accept connections without ever acknowledging them
    pub fn set_acknowledging(&self, acknowledging: bool) {
        self.lock().acknowledging = acknowledging;
    }

    /// Simulate an outage (`false`) or recovery (`true`) of the backend
    ///
    /// A connected session observes `Disconnected`/`Connected` events.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        if state.available == available {
            return;
        }
        state.available = available;
        debug!("local broker availability changed to {available}");

        let acknowledging = state.acknowledging;
        if let Some(session) = &state.session {
            let event = if available {
                if !acknowledging {
                    return;
                }
                TransportEvent::Connected
            } else {
                TransportEvent::Disconnected
            };
            let _ = session.events.send(event);
        }
    }

    /// Deliver a message as if another client had published it
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let state = self.lock();
        if let Some(session) = &state.session
            && session.subscriptions.contains(topic)
        {
            let _ = session.events.send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.into(),
            });
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let state = self.lock();
        let mut topics: Vec<String> = state
            .session
            .as_ref()
            .map(|session| session.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn is_session_open(&self) -> bool {
        self.lock().session.is_some()
    }
}

#[async_trait]
impl Transport for LocalBroker {
    async fn connect(
        &self,
        _credentials: &Credentials,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();

        if !state.accepting {
            return Err(TransportError::Unavailable("connection refused".to_string()));
        }

        if state.available && state.acknowledging {
            let _ = events.send(TransportEvent::Connected);
        }

        state.session = Some(Session {
            events,
            subscriptions: HashSet::new(),
        });

        debug!("local broker session opened");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut state = self.lock();
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Rejected("no open session".to_string()))?;

        session.subscriptions.insert(topic.to_string());
        trace!("subscribed to {topic}");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.lock();

        if !state.available {
            return Err(TransportError::Unavailable("broker offline".to_string()));
        }

        let Some(session) = &state.session else {
            return Err(TransportError::Unavailable("no open session".to_string()));
        };

        if session.subscriptions.contains(topic) {
            let _ = session.events.send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }

        if state.recording {
            state.published.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                qos,
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(session) = self.lock().session.take() {
            let _ = session.events.send(TransportEvent::Disconnected);
            debug!("local broker session closed");
        }
        Ok(())
    }
}
