//! Delivery channel to the messaging backend
//!
//! The channel publishes three message classes with distinct guarantees and
//! tracks whether the backend connection is currently up.
//!
//! | Class  | Topic (default)                | Guarantee     |
//! |--------|--------------------------------|---------------|
//! | Data   | `factory/sensors/temperature`  | at-least-once |
//! | Alert  | `factory/alerts/temperature`   | exactly-once  |
//! | Status | `factory/sensors/status`       | best-effort   |
//!
//! ## Tasks
//!
//! Connecting spawns two tasks:
//!
//! 1. **Event pump**: consumes [`TransportEvent`]s, flips the shared
//!    [`ConnectionState`], subscribes to the alert and status topics on every
//!    (re)connect and decodes inbound messages onto a queue
//! 2. **Dispatcher**: drains the queue into the registered [`InboundHandler`]s
//!
//! Connection state is only written by the pump and read by publishers.

pub mod error;
pub mod http;
pub mod inbound;
pub mod local;
pub mod mqtt;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};

pub use error::{DecodeError, DeliveryError, DeliveryResult};
pub use inbound::{InboundHandler, LoggingHandler};
pub use transport::{Credentials, Transport, TransportError, TransportEvent};

use crate::messages::{Alert, InboundMessage, Reading, StatusMessage};
use inbound::HandlerRegistry;

/// Capacity of the decoded inbound message queue
const INBOUND_QUEUE_SIZE: usize = 256;

/// How long `close` waits for the pump and dispatcher to drain
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivery guarantee requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Numeric MQTT QoS level
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Data,
    Alert,
    Status,
}

impl MessageClass {
    pub fn qos(self) -> QoS {
        match self {
            MessageClass::Data => QoS::AtLeastOnce,
            MessageClass::Alert => QoS::ExactlyOnce,
            MessageClass::Status => QoS::AtMostOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Topics {
    #[serde(default = "default_data_topic")]
    pub data: String,
    #[serde(default = "default_alert_topic")]
    pub alerts: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
}

impl Topics {
    pub fn topic_for(&self, class: MessageClass) -> &str {
        match class {
            MessageClass::Data => &self.data,
            MessageClass::Alert => &self.alerts,
            MessageClass::Status => &self.status,
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            data: default_data_topic(),
            alerts: default_alert_topic(),
            status: default_status_topic(),
        }
    }
}

fn default_data_topic() -> String {
    "factory/sensors/temperature".to_string()
}

fn default_alert_topic() -> String {
    "factory/alerts/temperature".to_string()
}

fn default_status_topic() -> String {
    "factory/sensors/status".to_string()
}

/// Process-wide connection flag shared between the pump and publishers
#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

pub struct DeliveryChannel {
    transport: Arc<dyn Transport>,
    topics: Topics,
    state: Arc<ConnectionState>,
    handlers: HandlerRegistry,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl DeliveryChannel {
    pub fn new(transport: Arc<dyn Transport>, topics: Topics, state: Arc<ConnectionState>) -> Self {
        Self {
            transport,
            topics,
            state,
            handlers: Arc::new(RwLock::new(Vec::new())),
            tasks: Mutex::new(Vec::new()),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Interval at which `connect` re-checks the connection flag
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub async fn register_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Connect and wait until the backend acknowledges the connection
    ///
    /// Polls the connection flag every `poll_interval` until `timeout` elapses.
    #[instrument(skip_all, fields(timeout = ?connect_timeout))]
    pub async fn connect(
        &self,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> DeliveryResult<()> {
        self.shutdown_tasks().await;
        self.state.set_connected(false);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);

        let pump = tokio::spawn(pump_events(
            event_rx,
            self.transport.clone(),
            self.topics.clone(),
            self.state.clone(),
            inbound_tx,
        ));
        let dispatcher = tokio::spawn(inbound::dispatch(inbound_rx, self.handlers.clone()));
        self.tasks.lock().await.extend([pump, dispatcher]);

        info!("connecting to broker");

        if let Err(e) = self.transport.connect(credentials, event_tx).await {
            self.shutdown_tasks().await;
            return Err(DeliveryError::ConnectFailed(e.to_string()));
        }

        let deadline = Instant::now() + connect_timeout;
        loop {
            if self.state.is_connected() {
                info!("connected to broker");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        warn!("broker did not acknowledge the connection");
        self.close().await;
        Err(DeliveryError::ConnectTimeout {
            timeout: connect_timeout,
        })
    }

    /// Publish a payload of the given class
    ///
    /// Fails with [`DeliveryError::NotConnected`] without touching the
    /// transport when the connection is down.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        class: MessageClass,
        payload: &T,
    ) -> DeliveryResult<()> {
        if !self.state.is_connected() {
            return Err(DeliveryError::NotConnected);
        }

        let bytes = serde_json::to_vec(payload).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let topic = self.topics.topic_for(class);

        self.transport
            .publish(topic, bytes, class.qos())
            .await
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;

        trace!("published {class:?} message to {topic}");
        Ok(())
    }

    pub async fn publish_reading(&self, reading: &Reading) -> DeliveryResult<()> {
        self.publish(MessageClass::Data, reading).await
    }

    pub async fn publish_alert(&self, alert: &Alert) -> DeliveryResult<()> {
        self.publish(MessageClass::Alert, alert).await
    }

    pub async fn publish_status(&self, status: &StatusMessage) -> DeliveryResult<()> {
        self.publish(MessageClass::Status, status).await
    }

    /// Disconnect from the backend and stop the pump and dispatcher
    pub async fn close(&self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("error while disconnecting: {e}");
        }
        self.shutdown_tasks().await;
        self.state.set_connected(false);
        debug!("delivery channel closed");
    }

    async fn shutdown_tasks(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for mut handle in handles {
            if timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    transport: Arc<dyn Transport>,
    topics: Topics,
    state: Arc<ConnectionState>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    debug!("starting transport event pump");

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                state.set_connected(true);
                debug!("connection acknowledged");

                for class in [MessageClass::Alert, MessageClass::Status] {
                    let topic = topics.topic_for(class);
                    if let Err(e) = transport.subscribe(topic, class.qos()).await {
                        warn!("could not subscribe to {topic}: {e}");
                    }
                }
            }

            TransportEvent::Disconnected => {
                state.set_connected(false);
                warn!("disconnected from broker");
            }

            TransportEvent::Message { topic, payload } => {
                match inbound::decode(&topics, &topic, &payload) {
                    Ok(message) => {
                        if inbound.send(message).await.is_err() {
                            warn!("inbound dispatcher gone, stopping event pump");
                            break;
                        }
                    }
                    Err(e) => warn!("discarding inbound message: {e}"),
                }
            }
        }
    }

    state.set_connected(false);
    debug!("transport event pump stopped");
}
