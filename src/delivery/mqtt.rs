//! MQTT transport
//!
//! Talks to a real broker through `rumqttc`. The client's event loop runs on
//! its own task and its notifications are translated into
//! [`TransportEvent`]s:
//!
//! | rumqttc                      | TransportEvent |
//! |------------------------------|----------------|
//! | `ConnAck` (accepted)         | `Connected`    |
//! | `ConnAck` (refused)          | `Disconnected` |
//! | `Publish`                    | `Message`      |
//! | `Disconnect`, polling error  | `Disconnected` |
//!
//! After a polling error the loop waits and polls again, which makes the
//! client reconnect; the next accepted `ConnAck` reports the link as up.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};

use super::QoS;
use super::transport::{Credentials, EventSender, Transport, TransportError, TransportEvent};

/// Pending requests the client buffers before `publish` waits
const REQUEST_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const MQTT_PORT: u16 = 1883;

const MQTTS_PORT: u16 = 8883;

/// Broker address given as `mqtt://host[:port]` or `mqtts://host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("mqtts://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ssl://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("mqtt://") {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix("tcp://") {
            (false, rest)
        } else {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme in {url}"
            )));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    TransportError::InvalidEndpoint(format!("invalid port in {url}"))
                })?;
                (host, port)
            }
            None => (authority, if tls { MQTTS_PORT } else { MQTT_PORT }),
        };

        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(format!("missing host in {url}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

fn to_mqtt(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn translate(event: Event) -> Option<TransportEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            Some(TransportEvent::Connected)
        }
        Event::Incoming(Packet::ConnAck(ack)) => {
            warn!("broker refused the connection: {:?}", ack.code);
            Some(TransportEvent::Disconnected)
        }
        Event::Incoming(Packet::Publish(publish)) => Some(TransportEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Event::Incoming(Packet::Disconnect) => Some(TransportEvent::Disconnected),
        _ => None,
    }
}

async fn run_event_loop(mut event_loop: EventLoop, events: EventSender) {
    debug!("starting mqtt event loop");
    let mut online = false;

    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent to broker");
                break;
            }
            Ok(event) => {
                trace!("mqtt event: {event:?}");
                let Some(event) = translate(event) else {
                    continue;
                };

                match event {
                    TransportEvent::Connected => online = true,
                    TransportEvent::Disconnected => online = false,
                    TransportEvent::Message { .. } => {}
                }

                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                if online {
                    warn!("connection to broker lost: {e}");
                    online = false;
                    if events.send(TransportEvent::Disconnected).is_err() {
                        break;
                    }
                } else {
                    debug!("broker not reachable: {e}");
                }
                sleep(RECONNECT_DELAY).await;
            }
        }
    }

    debug!("mqtt event loop stopped");
}

struct Session {
    client: AsyncClient,
    events: EventSender,
    event_loop: JoinHandle<()>,
}

pub struct MqttTransport {
    endpoint: Endpoint,
    client_id: String,
    keepalive: Duration,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(endpoint: Endpoint, client_id: impl Into<String>, keepalive: Duration) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
            keepalive,
            session: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.lock()
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or_else(|| TransportError::Unavailable("no open session".to_string()))
    }

    fn options(&self, credentials: &Credentials) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.endpoint.host, self.endpoint.port);
        options.set_keep_alive(self.keepalive);

        if let Some(username) = &credentials.username {
            options.set_credentials(username, credentials.password.clone().unwrap_or_default());
        }
        if self.endpoint.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    #[instrument(skip_all, fields(host = %self.endpoint.host, port = self.endpoint.port))]
    async fn connect(
        &self,
        credentials: &Credentials,
        events: EventSender,
    ) -> Result<(), TransportError> {
        if let Some(previous) = self.lock().take() {
            previous.event_loop.abort();
        }

        let (client, event_loop) = AsyncClient::new(self.options(credentials), REQUEST_CAPACITY);
        let event_loop = tokio::spawn(run_event_loop(event_loop, events.clone()));
        info!(tls = self.endpoint.tls, "connecting to mqtt broker");

        *self.lock() = Some(Session {
            client,
            events,
            event_loop,
        });

        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, to_mqtt(qos))
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        trace!("subscribed to {topic}");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, to_mqtt(qos), false, payload)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.lock().take() else {
            return Ok(());
        };

        if let Err(e) = session.client.disconnect().await {
            debug!("could not request disconnect: {e}");
        }

        let mut event_loop = session.event_loop;
        if timeout(DISCONNECT_TIMEOUT, &mut event_loop).await.is_err() {
            event_loop.abort();
        }

        let _ = session.events.send(TransportEvent::Disconnected);
        debug!("mqtt session closed");
        Ok(())
    }
}
