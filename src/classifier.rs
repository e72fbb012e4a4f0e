//! Threshold-based alert classification
//!
//! ```text
//! temperature > high  → HIGH_TEMPERATURE (severity HIGH)
//! temperature < low   → LOW_TEMPERATURE  (severity MEDIUM)
//! otherwise           → no alert
//! ```
//!
//! Thresholds are validated on construction (`high > low`), so at most one
//! branch can fire for any reading.

use serde::Deserialize;

use crate::config::ConfigError;
use crate::messages::{Alert, AlertKind, Reading, Severity};

pub const DEFAULT_HIGH_THRESHOLD: f64 = 35.0;
pub const DEFAULT_LOW_THRESHOLD: f64 = 10.0;

/// Validated alert thresholds (°C)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct Thresholds {
    high: f64,
    low: f64,
}

#[derive(Deserialize)]
struct RawThresholds {
    #[serde(default = "default_high")]
    high: f64,
    #[serde(default = "default_low")]
    low: f64,
}

fn default_high() -> f64 {
    DEFAULT_HIGH_THRESHOLD
}

fn default_low() -> f64 {
    DEFAULT_LOW_THRESHOLD
}

impl TryFrom<RawThresholds> for Thresholds {
    type Error = ConfigError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        Thresholds::new(raw.high, raw.low)
    }
}

impl Thresholds {
    pub fn new(high: f64, low: f64) -> Result<Self, ConfigError> {
        if !high.is_finite() || !low.is_finite() || high <= low {
            return Err(ConfigError::InvalidThresholds { high, low });
        }
        Ok(Self { high, low })
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: DEFAULT_HIGH_THRESHOLD,
            low: DEFAULT_LOW_THRESHOLD,
        }
    }
}

/// Evaluate a reading against the thresholds
pub fn classify(reading: &Reading, thresholds: &Thresholds) -> Option<Alert> {
    let temperature = reading.temperature;

    let (kind, threshold, severity, message) = if temperature > thresholds.high {
        (
            AlertKind::High,
            thresholds.high,
            Severity::High,
            format!("High temperature detected: {temperature}°C"),
        )
    } else if temperature < thresholds.low {
        (
            AlertKind::Low,
            thresholds.low,
            Severity::Medium,
            format!("Low temperature detected: {temperature}°C"),
        )
    } else {
        return None;
    };

    Some(Alert {
        kind,
        sensor_id: reading.sensor_id.clone(),
        location: reading.location.clone(),
        temperature,
        threshold,
        message,
        timestamp: reading.timestamp,
        severity,
    })
}
