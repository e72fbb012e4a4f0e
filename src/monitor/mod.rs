//! Monitoring orchestrator
//!
//! Drives the per-sensor cycle across all registered sensors while the
//! connection comes and goes.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──► Connecting ──ok──► Active ──stop()──► Stopping ──► Idle
//!                       │
//!                       └── connect error ──► Idle (error returned to caller)
//! ```
//!
//! ## Concurrency
//!
//! The monitoring loop runs as its own task. The only state it shares with
//! the controller is the running flag and the cancellation token; the
//! connection flag is owned here and handed to the delivery channel, which is
//! the only writer.

mod cycle;
mod stats;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

pub use cycle::{CycleOutcome, Persistence, PersistPolicy, Pipeline, PublishFailurePolicy};
pub use stats::{MonitorStats, StatsSnapshot};

use crate::classifier::Thresholds;
use crate::config::Config;
use crate::delivery::{
    ConnectionState, Credentials, DeliveryChannel, DeliveryError, DeliveryResult, InboundHandler,
    Topics, Transport,
};
use crate::messages::StatusMessage;
use crate::sensor::{GeneratorProfile, ReadingGenerator, SensorIdentity};
use crate::storage::ReadingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Connecting,
    Active,
    Stopping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// The delivery channel could not be connected
    Connection(DeliveryError),
    AlreadyRunning,
    NotRunning,
    DuplicateSensor(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Connection(e) => write!(f, "monitoring could not start: {e}"),
            MonitorError::AlreadyRunning => write!(f, "monitor is already running"),
            MonitorError::NotRunning => write!(f, "monitor is not running"),
            MonitorError::DuplicateSensor(id) => write!(f, "sensor {id} is already registered"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Connection(e) => Some(e),
            _ => None,
        }
    }
}

/// Runtime settings of a [`Monitor`]
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub thresholds: Thresholds,
    pub topics: Topics,
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub connect_poll: Duration,

    /// Pause after each sensor
    pub sensor_delay: Duration,

    /// Pause after each full pass over all sensors
    pub cycle_delay: Duration,

    /// Wait between publishing OFFLINE and closing the channel
    pub shutdown_grace: Duration,
    pub persist_on: PersistPolicy,
    pub on_publish_failure: PublishFailurePolicy,
    pub profile: GeneratorProfile,
    pub seed: Option<u64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thresholds: config.thresholds,
            topics: config.broker.topics.clone(),
            credentials: config.broker.credentials(),
            connect_timeout: config.broker.connect_timeout(),
            connect_poll: config.broker.connect_poll(),
            sensor_delay: Duration::from_millis(config.cadence.sensor_delay_ms),
            cycle_delay: Duration::from_millis(config.cadence.cycle_delay_ms),
            shutdown_grace: Duration::from_millis(config.cadence.shutdown_grace_ms),
            persist_on: config.policy.persist_on,
            on_publish_failure: config.policy.on_publish_failure,
            profile: GeneratorProfile::default(),
            seed: config.seed,
        }
    }

    fn generator(&self) -> ReadingGenerator {
        match self.seed {
            Some(seed) => ReadingGenerator::seeded(seed, self.profile.clone()),
            None => ReadingGenerator::new(self.profile.clone()),
        }
    }
}

pub struct Monitor {
    channel: Arc<DeliveryChannel>,
    store: Arc<dyn ReadingStore>,
    settings: MonitorSettings,
    sensors: Vec<SensorIdentity>,
    stats: Arc<MonitorStats>,
    state: MonitorState,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ReadingStore>,
        settings: MonitorSettings,
    ) -> Self {
        let connection = Arc::new(ConnectionState::default());
        let channel = DeliveryChannel::new(transport, settings.topics.clone(), connection)
            .with_poll_interval(settings.connect_poll);

        Self {
            channel: Arc::new(channel),
            store,
            settings,
            sensors: Vec::new(),
            stats: Arc::default(),
            state: MonitorState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn sensors(&self) -> &[SensorIdentity] {
        &self.sensors
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Register a sensor; only allowed while idle
    pub fn add_sensor(
        &mut self,
        id: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<(), MonitorError> {
        if self.state != MonitorState::Idle {
            return Err(MonitorError::AlreadyRunning);
        }

        let sensor = SensorIdentity::new(id, location);
        if self.sensors.iter().any(|s| s.id == sensor.id) {
            return Err(MonitorError::DuplicateSensor(sensor.id));
        }

        info!("registered sensor {} at {}", sensor.id, sensor.location);
        self.sensors.push(sensor);
        Ok(())
    }

    pub async fn register_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.channel.register_handler(handler).await;
    }

    /// Connect, announce the system and spawn the monitoring loop
    ///
    /// A connection failure leaves the monitor idle so `start` can be retried.
    #[instrument(skip(self), fields(sensors = self.sensors.len()))]
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::Idle {
            return Err(MonitorError::AlreadyRunning);
        }

        self.state = MonitorState::Connecting;
        info!("starting temperature monitoring");

        if let Err(e) = self
            .channel
            .connect(&self.settings.credentials, self.settings.connect_timeout)
            .await
        {
            error!("could not start monitoring: {e}");
            self.state = MonitorState::Idle;
            return Err(MonitorError::Connection(e));
        }

        let online = StatusMessage::online(self.sensors.len());
        if let Err(e) = self.channel.publish_status(&online).await {
            warn!("failed to publish online status: {e}");
        }

        let pipeline = Pipeline::new(
            self.channel.clone(),
            self.store.clone(),
            self.settings.thresholds,
            self.stats.clone(),
        )
        .with_policies(self.settings.persist_on, self.settings.on_publish_failure);

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        self.running.store(true, Ordering::Release);

        let monitoring_loop = MonitoringLoop {
            pipeline,
            sensors: self.sensors.clone(),
            generator: self.settings.generator(),
            sensor_delay: self.settings.sensor_delay,
            cycle_delay: self.settings.cycle_delay,
            running: self.running.clone(),
            cancel,
        };
        self.task = Some(tokio::spawn(monitoring_loop.run()));

        self.state = MonitorState::Active;
        info!("monitoring {} sensors", self.sensors.len());
        Ok(())
    }

    /// Stop the loop, announce shutdown and close the channel
    ///
    /// Once this returns the loop has exited and issues no further publishes
    /// or writes.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::Active {
            return Err(MonitorError::NotRunning);
        }

        self.state = MonitorState::Stopping;
        info!("stopping temperature monitoring");

        self.running.store(false, Ordering::Release);
        self.cancel.cancel();

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("monitoring loop ended abnormally: {e}");
        }

        if let Err(e) = self.channel.publish_status(&StatusMessage::offline()).await {
            warn!("failed to publish offline status: {e}");
        }

        sleep(self.settings.shutdown_grace).await;
        self.channel.close().await;

        self.state = MonitorState::Idle;
        info!("monitoring stopped");
        Ok(())
    }

    /// Publish a best-effort heartbeat status
    pub async fn publish_heartbeat(&self) -> DeliveryResult<()> {
        self.channel
            .publish_status(&StatusMessage::heartbeat(self.sensors.len()))
            .await
    }
}

struct MonitoringLoop {
    pipeline: Pipeline,
    sensors: Vec<SensorIdentity>,
    generator: ReadingGenerator,
    sensor_delay: Duration,
    cycle_delay: Duration,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl MonitoringLoop {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn run(mut self) {
        debug!("starting monitoring loop");

        'cycles: while self.is_running() {
            for sensor in &self.sensors {
                if !self.is_running() {
                    break 'cycles;
                }

                let reading = self.generator.generate(sensor);
                let outcome = self.pipeline.process(reading, &self.cancel).await;
                trace!(
                    stored = outcome.persistence().is_stored(),
                    "cycle outcome for {}: {outcome:?}",
                    sensor.id
                );

                if !pause(self.sensor_delay, &self.cancel).await {
                    break 'cycles;
                }
            }

            self.pipeline.stats().cycle_completed();

            if !pause(self.cycle_delay, &self.cancel).await {
                break;
            }
        }

        debug!("monitoring loop stopped");
    }
}

/// Sleep unless cancelled; returns `false` when cancelled
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
