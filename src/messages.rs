//! Wire payloads exchanged over the messaging backend
//!
//! All payloads are UTF-8 JSON objects. Readings travel on the data topic,
//! alerts on the alert topic and status notifications on the status topic.
//!
//! ## Design Principles
//!
//! 1. **Self-describing**: every payload carries its own timestamp and sensor context
//! 2. **Lossless**: a payload decoded from the wire equals the one that was encoded
//! 3. **Cloneable**: payloads are fanned out to the store, the channel and the logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name announced in every status message
pub const SYSTEM_NAME: &str = "IoT Temperature Monitoring";

/// Unit reported by every reading
pub const CELSIUS: &str = "celsius";

/// A single temperature measurement of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Identifier of the sensor that produced the reading
    pub sensor_id: String,

    /// Where the sensor is installed
    pub location: String,

    /// Measured temperature (°C, rounded to two decimals)
    pub temperature: f64,

    /// When the reading was generated
    pub timestamp: DateTime<Utc>,

    /// Measurement unit, always [`CELSIUS`]
    pub unit: String,
}

/// Which threshold an alert crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "HIGH_TEMPERATURE")]
    High,
    #[serde(rename = "LOW_TEMPERATURE")]
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
}

/// Alert raised when a reading leaves the configured temperature band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "alert_type")]
    pub kind: AlertKind,
    pub sensor_id: String,
    pub location: String,
    pub temperature: f64,

    /// The threshold that was crossed
    pub threshold: f64,

    /// Human readable description
    pub message: String,

    /// Timestamp of the reading that triggered the alert
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemStatus {
    Online,
    Offline,
    Heartbeat,
}

/// Status notification published on the status topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub system: String,
    pub status: SystemStatus,

    /// Number of registered sensors (announced when going online)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors_count: Option<usize>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StatusMessage {
    pub fn online(sensors_count: usize) -> Self {
        Self {
            system: SYSTEM_NAME.to_string(),
            status: SystemStatus::Online,
            sensors_count: Some(sensors_count),
            timestamp: Utc::now(),
            message: "monitoring system started".to_string(),
        }
    }

    pub fn offline() -> Self {
        Self {
            system: SYSTEM_NAME.to_string(),
            status: SystemStatus::Offline,
            sensors_count: None,
            timestamp: Utc::now(),
            message: "monitoring system stopped".to_string(),
        }
    }

    pub fn heartbeat(sensors_count: usize) -> Self {
        Self {
            system: SYSTEM_NAME.to_string(),
            status: SystemStatus::Heartbeat,
            sensors_count: Some(sensors_count),
            timestamp: Utc::now(),
            message: "monitoring system active".to_string(),
        }
    }
}

/// Decoded message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Alert(Alert),
    Status(StatusMessage),
}
