//! HTTP bridge transport
//!
//! Publishes through the HTTP publish API offered by most MQTT brokers
//! (`POST /api/v5/publish`) and tracks liveness with a keepalive probe
//! against `GET /api/v5/status`.
//!
//! ## Message Flow
//!
//! ```text
//! connect → probe status → Connected event → keepalive task
//!                                                 │
//!                     probe fails ──► Disconnected event
//!                     probe recovers ─► Connected event
//! ```
//!
//! Subscriptions are not available over plain HTTP, so inbound alert and
//! status messages are never received through this transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, trace, warn};

use super::QoS;
use super::transport::{Credentials, EventSender, Transport, TransportError, TransportEvent};

const PUBLISH_PATH: &str = "/api/v5/publish";

const STATUS_PATH: &str = "/api/v5/status";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    qos: u8,
    payload: &'a str,
    retain: bool,
}

struct Session {
    credentials: Credentials,
    events: EventSender,
    online: Arc<AtomicBool>,
    keepalive: JoinHandle<()>,
}

pub struct HttpBridgeTransport {
    client: Client,
    base_url: String,
    keepalive: Duration,
    session: Mutex<Option<Session>>,
}

impl HttpBridgeTransport {
    pub fn new(base_url: impl Into<String>, keepalive: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keepalive,
            session: Mutex::new(None),
        })
    }

    fn take_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn session_parts(&self) -> Option<(Credentials, EventSender, Arc<AtomicBool>)> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|s| (s.credentials.clone(), s.events.clone(), s.online.clone()))
    }
}

fn with_auth(request: reqwest::RequestBuilder, credentials: &Credentials) -> reqwest::RequestBuilder {
    match &credentials.username {
        Some(username) => request.basic_auth(username, credentials.password.as_ref()),
        None => request,
    }
}

async fn probe(
    client: &Client,
    base_url: &str,
    credentials: &Credentials,
) -> Result<(), TransportError> {
    let url = format!("{base_url}{STATUS_PATH}");
    trace!("probing {url}");

    let response = with_auth(client.get(&url), credentials)
        .send()
        .await
        .map_err(|e| TransportError::Unavailable(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TransportError::Rejected(format!("HTTP {}", response.status())));
    }

    Ok(())
}

/// Report an online/offline transition exactly once
fn transition(online: &AtomicBool, events: &EventSender, now_online: bool) {
    if online.swap(now_online, Ordering::AcqRel) != now_online {
        let event = if now_online {
            TransportEvent::Connected
        } else {
            TransportEvent::Disconnected
        };
        let _ = events.send(event);
    }
}

async fn keepalive_loop(
    client: Client,
    base_url: String,
    credentials: Credentials,
    events: EventSender,
    online: Arc<AtomicBool>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately; connect already probed
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match probe(&client, &base_url, &credentials).await {
            Ok(()) => transition(&online, &events, true),
            Err(e) => {
                if online.load(Ordering::Acquire) {
                    warn!("keepalive probe failed: {e}");
                }
                transition(&online, &events, false);
            }
        }
    }
}

#[async_trait]
impl Transport for HttpBridgeTransport {
    #[instrument(skip_all, fields(url = %self.base_url))]
    async fn connect(
        &self,
        credentials: &Credentials,
        events: EventSender,
    ) -> Result<(), TransportError> {
        if let Some(previous) = self.take_session() {
            previous.keepalive.abort();
        }

        probe(&self.client, &self.base_url, credentials).await?;
        info!("HTTP bridge reachable");

        let online = Arc::new(AtomicBool::new(true));
        let _ = events.send(TransportEvent::Connected);

        let keepalive = tokio::spawn(keepalive_loop(
            self.client.clone(),
            self.base_url.clone(),
            credentials.clone(),
            events.clone(),
            online.clone(),
            self.keepalive,
        ));

        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Session {
            credentials: credentials.clone(),
            events,
            online,
            keepalive,
        });

        Ok(())
    }

    async fn subscribe(&self, _topic: &str, _qos: QoS) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("subscriptions over the HTTP bridge"))
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError> {
        let (credentials, events, online) = self
            .session_parts()
            .ok_or_else(|| TransportError::Unavailable("no open session".to_string()))?;

        let payload = String::from_utf8(payload)
            .map_err(|e| TransportError::Rejected(format!("payload is not UTF-8: {e}")))?;

        let body = PublishRequest {
            topic,
            qos: qos.level(),
            payload: &payload,
            retain: false,
        };

        let url = format!("{}{PUBLISH_PATH}", self.base_url);
        let response = match with_auth(self.client.post(&url), &credentials)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                transition(&online, &events, false);
                return Err(TransportError::Unavailable(e.to_string()));
            }
        };

        if !response.status().is_success() {
            return Err(TransportError::Rejected(format!("HTTP {}", response.status())));
        }

        trace!("published to {topic}");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(session) = self.take_session() {
            session.keepalive.abort();
            transition(&session.online, &session.events, false);
            debug!("HTTP bridge session closed");
        }
        Ok(())
    }
}
