//! Reading store trait definition

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::StoredRecord;
use crate::messages::Reading;

/// Health status of the store
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the store operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only sink for readings
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the monitoring loop holds the store
/// behind an `Arc` and calls it from its own task.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Append one row for the reading
    ///
    /// Never mutates or deletes existing rows.
    async fn record(&self, reading: &Reading, alert_triggered: bool) -> StorageResult<()>;

    /// Total number of stored rows
    async fn count(&self) -> StorageResult<usize>;

    /// The `limit` most recent rows of a sensor, oldest first
    async fn latest(&self, sensor_id: &str, limit: usize) -> StorageResult<Vec<StoredRecord>>;

    /// Lightweight check that the store can be reached
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human readable statistics (e.g. "SQLite: 120 rows, 3 alerts")
    async fn get_stats(&self) -> StorageResult<String>;
}
