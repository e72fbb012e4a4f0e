//! Failure tests for the monitoring pipeline
//!
//! These tests verify that the system handles failures gracefully:
//! - Broker refusing or never acknowledging the connection
//! - Broker outages while the loop is running
//! - Malformed inbound payloads

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use sensor_alerting::delivery::local::LocalBroker;
use sensor_alerting::delivery::{DeliveryError, InboundHandler};
use sensor_alerting::messages::InboundMessage;
use sensor_alerting::monitor::{MonitorError, MonitorState};
use sensor_alerting::storage::{MemoryStore, ReadingStore};

use crate::helpers::*;

#[tokio::test]
async fn test_refused_connection_fails_start() {
    let broker = LocalBroker::recording();
    broker.set_accepting(false);
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );

    let result = monitor.start().await;

    assert_matches!(
        result,
        Err(MonitorError::Connection(DeliveryError::ConnectFailed(_)))
    );
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_unacknowledged_connection_times_out() {
    let broker = LocalBroker::recording();
    broker.set_acknowledging(false);
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );

    let started = tokio::time::Instant::now();
    let result = monitor.start().await;

    assert_matches!(
        result,
        Err(MonitorError::Connection(DeliveryError::ConnectTimeout { .. }))
    );
    assert!(started.elapsed() >= fast_settings().connect_timeout);
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert!(!monitor.is_connected());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(!broker.is_session_open());
}

#[tokio::test]
async fn test_outage_drops_readings_without_storing_them() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        fast_settings(),
        &[("TEMP_001", "Production Floor"), ("TEMP_002", "Warehouse")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().readings_published >= 2).await;

    broker.set_available(false);
    wait_for(|| monitor.stats().readings_dropped >= 1).await;
    let stored_before = store.count().await.unwrap();
    wait_for(|| monitor.stats().readings_dropped >= 4).await;

    // nothing published, nothing stored while the broker is gone
    assert_eq!(store.count().await.unwrap(), stored_before);
    assert_eq!(monitor.state(), MonitorState::Active);

    broker.set_available(true);
    let published = monitor.stats().readings_published;
    wait_for(|| monitor.stats().readings_published >= published + 2).await;
    monitor.stop().await.unwrap();

    let stats = monitor.stats();
    assert_eq!(stats.records_persisted, stats.readings_published);
    assert_eq!(store.count().await.unwrap() as u64, stats.readings_published);
    assert_eq!(
        broker.published_on(DATA_TOPIC).len() as u64,
        stats.readings_published
    );
}

#[tokio::test]
async fn test_monitor_can_start_after_failed_attempt() {
    let broker = LocalBroker::recording();
    broker.set_accepting(false);
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );

    assert!(monitor.start().await.is_err());

    broker.set_accepting(true);
    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Active);

    monitor.stop().await.unwrap();
}

#[derive(Default)]
struct Counter(AtomicUsize);

impl InboundHandler for Counter {
    fn handle(&self, _message: &InboundMessage) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Exploding;

impl InboundHandler for Exploding {
    fn handle(&self, _message: &InboundMessage) {
        panic!("handler exploded");
    }
}

#[tokio::test]
async fn test_malformed_inbound_payloads_are_discarded() {
    let broker = LocalBroker::recording();
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );
    let counter = Arc::new(Counter::default());
    monitor.register_handler(Arc::new(Exploding)).await;
    monitor.register_handler(counter.clone()).await;

    monitor.start().await.unwrap();
    wait_for(|| broker.subscriptions().len() == 2).await;

    broker.inject(ALERT_TOPIC, "not json at all");
    broker.inject(STATUS_TOPIC, vec![0xff, 0x00, 0xfe]);
    broker.inject(
        STATUS_TOPIC,
        r#"{"system":"other","status":"HEARTBEAT","timestamp":"2025-01-01T00:00:00Z","message":"alive"}"#,
    );

    wait_for(|| counter.0.load(Ordering::SeqCst) >= 1).await;
    wait_for(|| monitor.stats().readings_published > 0).await;
    monitor.stop().await.unwrap();

    assert_eq!(monitor.state(), MonitorState::Idle);
}
