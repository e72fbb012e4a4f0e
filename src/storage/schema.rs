//! Row definitions for the `sensor_readings` table
//!
//! One row is appended per persisted reading. Rows are never updated or
//! deleted by the monitoring system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::Reading;

/// A persisted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Auto-incremented row id
    pub id: i64,
    pub sensor_id: String,
    pub location: String,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,

    /// Whether the reading crossed a threshold
    pub alert_triggered: bool,
}

impl StoredRecord {
    /// Build the record for a reading; `id` is assigned by the store
    pub fn from_reading(id: i64, reading: &Reading, alert_triggered: bool) -> Self {
        Self {
            id,
            sensor_id: reading.sensor_id.clone(),
            location: reading.location.clone(),
            temperature: reading.temperature,
            timestamp: reading.timestamp,
            alert_triggered,
        }
    }
}
