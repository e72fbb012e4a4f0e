//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sensor_alerting::delivery::local::LocalBroker;
use sensor_alerting::messages::{Reading, StatusMessage, SystemStatus};
use sensor_alerting::monitor::{Monitor, MonitorSettings};
use sensor_alerting::sensor::GeneratorProfile;
use sensor_alerting::storage::{
    HealthStatus, ReadingStore, StorageError, StorageResult, StoredRecord,
};

pub const DATA_TOPIC: &str = "factory/sensors/temperature";
pub const ALERT_TOPIC: &str = "factory/alerts/temperature";
pub const STATUS_TOPIC: &str = "factory/sensors/status";

/// Millisecond pacing so tests complete many cycles quickly
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        connect_timeout: Duration::from_millis(200),
        connect_poll: Duration::from_millis(10),
        sensor_delay: Duration::from_millis(2),
        cycle_delay: Duration::from_millis(5),
        shutdown_grace: Duration::from_millis(10),
        seed: Some(2024),
        ..MonitorSettings::default()
    }
}

/// Every reading lands in 50..51 °C
pub fn hot_profile() -> GeneratorProfile {
    GeneratorProfile {
        base: 50.0,
        variation: 0.0..1.0,
        anomaly_probability: 0.0,
        anomaly_spike: 0.0..1.0,
    }
}

/// Every reading lands in 20..21 °C
pub fn mild_profile() -> GeneratorProfile {
    GeneratorProfile {
        base: 20.0,
        ..hot_profile()
    }
}

pub fn monitor_with(
    broker: &LocalBroker,
    store: Arc<dyn ReadingStore>,
    settings: MonitorSettings,
    sensors: &[(&str, &str)],
) -> Monitor {
    let mut monitor = Monitor::new(Arc::new(broker.clone()), store, settings);
    for (id, location) in sensors {
        monitor.add_sensor(*id, *location).unwrap();
    }
    monitor
}

pub fn statuses(broker: &LocalBroker) -> Vec<SystemStatus> {
    broker
        .published_on(STATUS_TOPIC)
        .iter()
        .map(|m| m.json::<StatusMessage>().unwrap().status)
        .collect()
}

pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Store whose writes always fail
#[derive(Default)]
pub struct FailingStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl ReadingStore for FailingStore {
    async fn record(&self, _reading: &Reading, _alert_triggered: bool) -> StorageResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::QueryFailed("database is locked".to_string()))
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(0)
    }

    async fn latest(&self, _sensor_id: &str, _limit: usize) -> StorageResult<Vec<StoredRecord>> {
        Ok(vec![])
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: false,
            message: "always failing".to_string(),
            metadata: Default::default(),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        Ok("Failing: 0 rows".to_string())
    }
}
