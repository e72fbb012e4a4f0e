//! End-to-end tests of the publish → classify → persist cycle

use std::sync::{Arc, Mutex};

use sensor_alerting::delivery::InboundHandler;
use sensor_alerting::delivery::local::LocalBroker;
use sensor_alerting::messages::{Alert, AlertKind, InboundMessage, Reading, Severity};
use sensor_alerting::monitor::{MonitorSettings, PersistPolicy, PublishFailurePolicy};
use sensor_alerting::storage::{MemoryStore, ReadingStore};

use crate::helpers::*;

#[derive(Default)]
struct AlertRecorder(Mutex<Vec<Alert>>);

impl InboundHandler for AlertRecorder {
    fn handle(&self, message: &InboundMessage) {
        if let InboundMessage::Alert(alert) = message {
            self.0.lock().unwrap().push(alert.clone());
        }
    }
}

#[tokio::test]
async fn test_hot_readings_raise_one_alert_each() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        MonitorSettings {
            profile: hot_profile(),
            ..fast_settings()
        },
        &[("TEMP_001", "Production Floor"), ("TEMP_004", "Server Room")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().cycles >= 3).await;
    monitor.stop().await.unwrap();

    let data = broker.published_on(DATA_TOPIC);
    let alerts = broker.published_on(ALERT_TOPIC);
    assert!(data.len() >= 6);
    assert_eq!(alerts.len(), data.len());

    for message in &alerts {
        let alert: Alert = message.json().unwrap();
        assert_eq!(alert.kind, AlertKind::High);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.threshold, 35.0);
        assert!(alert.message.starts_with("High temperature detected"));
    }

    let records = store.records().await;
    assert_eq!(records.len(), data.len());
    assert!(records.iter().all(|r| r.alert_triggered));
}

#[tokio::test]
async fn test_mild_readings_are_stored_without_alerts() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        MonitorSettings {
            profile: mild_profile(),
            ..fast_settings()
        },
        &[("TEMP_003", "Office")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().cycles >= 3).await;
    monitor.stop().await.unwrap();

    assert!(broker.published_on(ALERT_TOPIC).is_empty());

    let readings: Vec<Reading> = broker
        .published_on(DATA_TOPIC)
        .iter()
        .map(|m| m.json().unwrap())
        .collect();
    let records = store.latest("TEMP_003", readings.len()).await.unwrap();

    assert_eq!(records.len(), readings.len());
    for (record, reading) in records.iter().zip(&readings) {
        assert_eq!(record.temperature, reading.temperature);
        assert_eq!(record.location, "Office");
        assert!(!record.alert_triggered);
    }
}

#[tokio::test]
async fn test_published_alerts_reach_inbound_handlers() {
    let broker = LocalBroker::recording();
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        MonitorSettings {
            profile: hot_profile(),
            ..fast_settings()
        },
        &[("TEMP_004", "Server Room")],
    );
    let recorder = Arc::new(AlertRecorder::default());
    monitor.register_handler(recorder.clone()).await;

    monitor.start().await.unwrap();
    wait_for(|| !recorder.0.lock().unwrap().is_empty()).await;
    monitor.stop().await.unwrap();

    let received = recorder.0.lock().unwrap().clone();
    assert_eq!(received[0].sensor_id, "TEMP_004");
    assert_eq!(received[0].location, "Server Room");
}

#[tokio::test]
async fn test_persistence_failure_does_not_affect_delivery() {
    let broker = LocalBroker::recording();
    let store = Arc::new(FailingStore::default());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().cycles >= 3).await;
    monitor.stop().await.unwrap();

    let stats = monitor.stats();
    assert_eq!(stats.readings_dropped, 0);
    assert_eq!(stats.records_persisted, 0);
    assert_eq!(stats.persist_failures, stats.readings_published);
    assert_eq!(
        broker.published_on(DATA_TOPIC).len() as u64,
        stats.readings_published
    );
}

#[tokio::test]
async fn test_persist_always_keeps_undelivered_readings() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        MonitorSettings {
            profile: hot_profile(),
            persist_on: PersistPolicy::Always,
            ..fast_settings()
        },
        &[("TEMP_002", "Warehouse")],
    );

    monitor.start().await.unwrap();
    broker.set_available(false);
    wait_for(|| monitor.stats().readings_dropped >= 3).await;
    monitor.stop().await.unwrap();

    let stats = monitor.stats();
    assert_eq!(
        stats.records_persisted,
        stats.readings_published + stats.readings_dropped
    );
    assert_eq!(store.count().await.unwrap() as u64, stats.records_persisted);
    assert!(store.records().await.iter().all(|r| r.alert_triggered));
    assert_eq!(
        broker.published_on(ALERT_TOPIC).len() as u64,
        stats.alerts_published
    );
}

#[tokio::test]
async fn test_retry_policy_bridges_short_outage() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        MonitorSettings {
            on_publish_failure: PublishFailurePolicy::RetryThenDrop {
                attempts: 50,
                backoff_ms: 10,
            },
            ..fast_settings()
        },
        &[("TEMP_001", "Production Floor")],
    );

    monitor.start().await.unwrap();
    let published_before = monitor.stats().readings_published;

    broker.set_available(false);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    broker.set_available(true);

    wait_for(|| monitor.stats().readings_published >= published_before + 3).await;
    monitor.stop().await.unwrap();

    let stats = monitor.stats();
    assert_eq!(stats.readings_dropped, 0);
    assert_eq!(stats.records_persisted, stats.readings_published);
}
