//! In-memory reading store (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running with `"storage": { "backend": "none" }`
//!
//! All data is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{HealthStatus, ReadingStore};
use super::error::StorageResult;
use super::schema::StoredRecord;
use crate::messages::Reading;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record in insertion order
    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn record(&self, reading: &Reading, alert_triggered: bool) -> StorageResult<()> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(StoredRecord::from_reading(id, reading, alert_triggered));
        Ok(())
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.records.read().await.len())
    }

    async fn latest(&self, sensor_id: &str, limit: usize) -> StorageResult<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut latest: Vec<StoredRecord> = records
            .iter()
            .rev()
            .filter(|record| record.sensor_id == sensor_id)
            .take(limit)
            .cloned()
            .collect();
        latest.reverse();
        Ok(latest)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut metadata = HashMap::new();
        metadata.insert("backend".to_string(), "memory".to_string());

        Ok(HealthStatus {
            healthy: true,
            message: "in-memory store operational".to_string(),
            metadata,
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let records = self.records.read().await;
        let alerts = records.iter().filter(|r| r.alert_triggered).count();
        Ok(format!(
            "Memory: {} rows, {} alerts (not persisted)",
            records.len(),
            alerts
        ))
    }
}
