use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::classifier::Thresholds;
use crate::delivery::Topics;
use crate::delivery::mqtt::Endpoint;
use crate::delivery::transport::Credentials;
use crate::monitor::{PersistPolicy, PublishFailurePolicy};
use crate::sensor::SensorIdentity;
use crate::util;

/// Errors raised while validating configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Alert thresholds must be finite and satisfy `high > low`
    InvalidThresholds { high: f64, low: f64 },

    /// No sensors registered
    NoSensors,

    /// A sensor id is empty or whitespace
    EmptySensorId,

    /// Two sensors share the same id
    DuplicateSensor(String),

    /// A duration or count that must be positive is zero
    InvalidCadence(&'static str),

    /// The selected transport needs a broker URL
    MissingBrokerUrl,

    /// The broker URL does not fit the selected transport
    InvalidBrokerUrl(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidThresholds { high, low } => write!(
                f,
                "invalid thresholds: high ({high}) must be greater than low ({low})"
            ),
            ConfigError::NoSensors => write!(f, "no sensors configured"),
            ConfigError::EmptySensorId => write!(f, "sensor ids must not be empty"),
            ConfigError::DuplicateSensor(id) => write!(f, "duplicate sensor id: {id}"),
            ConfigError::InvalidCadence(field) => write!(f, "{field} must be greater than zero"),
            ConfigError::MissingBrokerUrl => {
                write!(f, "the selected transport requires a broker url")
            }
            ConfigError::InvalidBrokerUrl(msg) => write!(f, "invalid broker url: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database file (default)
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./sensor_data.db")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process loopback broker; messages never leave the process
    #[default]
    Local,

    /// MQTT broker (`mqtt://` or `mqtts://`)
    Mqtt,

    /// HTTP publish API of a remote broker
    Http,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    /// MQTT client id; a random one is generated when absent
    pub client_id: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_connect_poll")]
    pub connect_poll_ms: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default)]
    pub topics: Topics,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            url: None,
            username: None,
            password: None,
            client_id: None,
            connect_timeout_secs: default_connect_timeout(),
            connect_poll_ms: default_connect_poll(),
            keepalive_secs: default_keepalive(),
            topics: Topics::default(),
        }
    }
}

impl BrokerConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("sensor-monitor-{:04x}", rand::random::<u16>()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connect_poll() -> u64 {
    1000
}

fn default_keepalive() -> u64 {
    30
}

/// Pacing of the monitoring loop
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_sensor_delay")]
    pub sensor_delay_ms: u64,
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_ms: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            sensor_delay_ms: default_sensor_delay(),
            cycle_delay_ms: default_cycle_delay(),
            heartbeat_secs: default_heartbeat(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

fn default_sensor_delay() -> u64 {
    2000
}

fn default_cycle_delay() -> u64 {
    5000
}

fn default_heartbeat() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    2000
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub persist_on: PersistPolicy,
    #[serde(default)]
    pub on_publish_failure: PublishFailurePolicy,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorIdentity>,

    #[serde(default)]
    pub cadence: CadenceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Seed for the reading generator (random when absent)
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            thresholds: Thresholds::default(),
            sensors: default_sensors(),
            cadence: CadenceConfig::default(),
            storage: StorageConfig::default(),
            policy: PolicyConfig::default(),
            seed: None,
        }
    }
}

fn default_sensors() -> Vec<SensorIdentity> {
    vec![
        SensorIdentity::new("TEMP_001", "Production Floor"),
        SensorIdentity::new("TEMP_002", "Warehouse"),
        SensorIdentity::new("TEMP_003", "Office"),
        SensorIdentity::new("TEMP_004", "Server Room"),
    ]
}

impl Config {
    /// Overlay values from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(util::BROKER_URL) {
            self.broker.url = Some(url);
        }
        if let Some(username) = lookup(util::BROKER_USERNAME) {
            self.broker.username = Some(username);
        }
        if let Some(password) = lookup(util::BROKER_PASSWORD) {
            self.broker.password = Some(password);
        }
        if let Some(path) = lookup(util::SENSOR_DB_PATH) {
            self.storage = StorageConfig::Sqlite {
                path: PathBuf::from(path),
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err(ConfigError::EmptySensorId);
            }
            if !seen.insert(sensor.id.as_str()) {
                return Err(ConfigError::DuplicateSensor(sensor.id.clone()));
            }
        }

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidCadence("broker.connect_timeout_secs"));
        }
        if self.broker.connect_poll_ms == 0 {
            return Err(ConfigError::InvalidCadence("broker.connect_poll_ms"));
        }
        if self.cadence.heartbeat_secs == 0 {
            return Err(ConfigError::InvalidCadence("cadence.heartbeat_secs"));
        }
        if let PublishFailurePolicy::RetryThenDrop { attempts: 0, .. } =
            self.policy.on_publish_failure
        {
            return Err(ConfigError::InvalidCadence("policy.on_publish_failure.attempts"));
        }

        match (self.broker.transport, &self.broker.url) {
            (TransportKind::Local, _) => {}
            (_, None) => return Err(ConfigError::MissingBrokerUrl),
            (TransportKind::Mqtt, Some(url)) => {
                Endpoint::parse(url).map_err(|e| ConfigError::InvalidBrokerUrl(e.to_string()))?;
            }
            (TransportKind::Http, Some(_)) => {}
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file provided: {path}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
