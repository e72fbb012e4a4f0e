//! Lifecycle tests: status announcements and loop termination

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use sensor_alerting::delivery::local::LocalBroker;
use sensor_alerting::messages::{StatusMessage, SystemStatus};
use sensor_alerting::monitor::{MonitorSettings, MonitorState};
use sensor_alerting::storage::{MemoryStore, ReadingStore};

use crate::helpers::*;

#[tokio::test]
async fn test_no_activity_after_stop() {
    let broker = LocalBroker::recording();
    let store = Arc::new(MemoryStore::new());
    let mut monitor = monitor_with(
        &broker,
        store.clone(),
        fast_settings(),
        &[("TEMP_001", "Production Floor"), ("TEMP_002", "Warehouse")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().cycles >= 2).await;
    monitor.stop().await.unwrap();

    let published = broker.published().len();
    let stored = store.count().await.unwrap();
    let stats = monitor.stats();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(broker.published().len(), published);
    assert_eq!(store.count().await.unwrap(), stored);
    assert_eq!(monitor.stats(), stats);
    assert!(!monitor.is_connected());
    assert!(!broker.is_session_open());
}

#[tokio::test]
async fn test_status_announcements_bracket_the_run() {
    let broker = LocalBroker::recording();
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        fast_settings(),
        &[
            ("TEMP_001", "Production Floor"),
            ("TEMP_002", "Warehouse"),
            ("TEMP_003", "Office"),
        ],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().cycles >= 1).await;
    monitor.publish_heartbeat().await.unwrap();
    monitor.stop().await.unwrap();

    assert_eq!(
        statuses(&broker),
        vec![
            SystemStatus::Online,
            SystemStatus::Heartbeat,
            SystemStatus::Offline
        ]
    );

    let messages: Vec<StatusMessage> = broker
        .published_on(STATUS_TOPIC)
        .iter()
        .map(|m| m.json().unwrap())
        .collect();
    assert_eq!(messages[0].sensors_count, Some(3));
    assert_eq!(messages[0].system, "IoT Temperature Monitoring");
    assert_eq!(messages[2].sensors_count, None);

    // the OFFLINE status is the last message the monitor ever sends
    let last = broker.published().last().cloned().unwrap();
    assert_eq!(last.topic, STATUS_TOPIC);
}

#[tokio::test]
async fn test_stop_is_prompt_with_slow_cadence() {
    let broker = LocalBroker::recording();
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        MonitorSettings {
            sensor_delay: Duration::from_secs(30),
            cycle_delay: Duration::from_secs(30),
            ..fast_settings()
        },
        &[("TEMP_001", "Production Floor"), ("TEMP_002", "Warehouse")],
    );

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().readings_published >= 1).await;

    let started = tokio::time::Instant::now();
    monitor.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(monitor.state(), MonitorState::Idle);
    // second sensor never got its turn
    assert_eq!(monitor.stats().readings_published, 1);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let broker = LocalBroker::recording();
    let mut monitor = monitor_with(
        &broker,
        Arc::new(MemoryStore::new()),
        fast_settings(),
        &[("TEMP_001", "Production Floor")],
    );

    for _ in 0..2 {
        monitor.start().await.unwrap();
        wait_for(|| monitor.is_connected()).await;
        monitor.stop().await.unwrap();
    }

    assert_eq!(
        statuses(&broker),
        vec![
            SystemStatus::Online,
            SystemStatus::Offline,
            SystemStatus::Online,
            SystemStatus::Offline
        ]
    );
}

#[tokio::test]
async fn test_independent_monitors_run_concurrently() {
    let brokers: Vec<LocalBroker> = (0..3).map(|_| LocalBroker::recording()).collect();

    let runs = brokers.iter().map(|broker| {
        let broker = broker.clone();
        async move {
            let store = Arc::new(MemoryStore::new());
            let mut monitor = monitor_with(
                &broker,
                store.clone(),
                fast_settings(),
                &[("TEMP_001", "Production Floor")],
            );
            monitor.start().await.unwrap();
            wait_for(|| monitor.stats().cycles >= 2).await;
            monitor.stop().await.unwrap();
            (monitor.stats().readings_published, store.count().await.unwrap())
        }
    });

    for (published, stored) in join_all(runs).await {
        assert!(published >= 2);
        assert_eq!(published, stored as u64);
    }
}
