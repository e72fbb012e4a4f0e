//! Monitor writing to a real SQLite file

use std::sync::Arc;

use sensor_alerting::delivery::local::LocalBroker;
use sensor_alerting::messages::Reading;
use sensor_alerting::monitor::MonitorSettings;
use sensor_alerting::storage::ReadingStore;
use sensor_alerting::storage::sqlite::SqliteStore;
use tempfile::TempDir;

use crate::helpers::*;

#[tokio::test]
async fn test_published_readings_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sensor_data.db");
    let broker = LocalBroker::recording();

    {
        let store = Arc::new(SqliteStore::init(&db_path).await.unwrap());
        let mut monitor = monitor_with(
            &broker,
            store,
            MonitorSettings {
                profile: hot_profile(),
                ..fast_settings()
            },
            &[("TEMP_001", "Production Floor"), ("TEMP_004", "Server Room")],
        );

        monitor.start().await.unwrap();
        wait_for(|| monitor.stats().cycles >= 2).await;
        monitor.stop().await.unwrap();
    }

    let reopened = SqliteStore::init(&db_path).await.unwrap();
    let published: Vec<Reading> = broker
        .published_on(DATA_TOPIC)
        .iter()
        .map(|m| m.json().unwrap())
        .collect();

    assert_eq!(reopened.count().await.unwrap(), published.len());

    let server_room: Vec<&Reading> = published
        .iter()
        .filter(|r| r.sensor_id == "TEMP_004")
        .collect();
    let records = reopened.latest("TEMP_004", 100).await.unwrap();

    assert_eq!(records.len(), server_room.len());
    for (record, reading) in records.iter().zip(server_room) {
        assert_eq!(record.temperature, reading.temperature);
        assert_eq!(record.timestamp, reading.timestamp);
        assert_eq!(record.location, "Server Room");
        assert!(record.alert_triggered);
    }

    let stats = reopened.get_stats().await.unwrap();
    assert!(stats.contains(&format!("{} rows", published.len())));
}
