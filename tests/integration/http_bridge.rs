//! Monitor running against a mocked HTTP publish API

use std::sync::Arc;
use std::time::Duration;

use sensor_alerting::delivery::http::HttpBridgeTransport;
use sensor_alerting::messages::{Reading, StatusMessage, SystemStatus};
use sensor_alerting::monitor::{Monitor, MonitorSettings};
use sensor_alerting::storage::{MemoryStore, ReadingStore};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn broker_api(publish_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v5/publish"))
        .respond_with(ResponseTemplate::new(publish_status))
        .mount(&server)
        .await;
    server
}

async fn published_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/api/v5/publish")
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

fn http_monitor(server: &MockServer, store: Arc<MemoryStore>) -> Monitor {
    let transport = HttpBridgeTransport::new(server.uri(), Duration::from_secs(60)).unwrap();
    let mut monitor = Monitor::new(
        Arc::new(transport),
        store,
        MonitorSettings {
            sensor_delay: Duration::from_millis(10),
            cycle_delay: Duration::from_millis(10),
            ..fast_settings()
        },
    );
    monitor.add_sensor("TEMP_001", "Production Floor").unwrap();
    monitor
}

#[tokio::test]
async fn test_monitor_publishes_through_http_bridge() {
    let server = broker_api(200).await;
    let store = Arc::new(MemoryStore::new());
    let mut monitor = http_monitor(&server, store.clone());

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().readings_published >= 3).await;
    monitor.stop().await.unwrap();

    let bodies = published_bodies(&server).await;

    let first = &bodies[0];
    assert_eq!(first["topic"], STATUS_TOPIC);
    assert_eq!(first["qos"], 0);
    let online: StatusMessage = serde_json::from_str(first["payload"].as_str().unwrap()).unwrap();
    assert_eq!(online.status, SystemStatus::Online);

    let data: Vec<&Value> = bodies.iter().filter(|b| b["topic"] == DATA_TOPIC).collect();
    assert_eq!(data.len() as u64, monitor.stats().readings_published);
    for body in &data {
        assert_eq!(body["qos"], 1);
        let reading: Reading = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
        assert_eq!(reading.sensor_id, "TEMP_001");
    }

    let last = bodies.last().unwrap();
    let offline: StatusMessage = serde_json::from_str(last["payload"].as_str().unwrap()).unwrap();
    assert_eq!(offline.status, SystemStatus::Offline);

    assert_eq!(store.count().await.unwrap() as u64, monitor.stats().readings_published);
}

#[tokio::test]
async fn test_rejected_publishes_are_dropped() {
    let server = broker_api(503).await;
    let store = Arc::new(MemoryStore::new());
    let mut monitor = http_monitor(&server, store.clone());

    monitor.start().await.unwrap();
    wait_for(|| monitor.stats().readings_dropped >= 2).await;
    monitor.stop().await.unwrap();

    let stats = monitor.stats();
    assert_eq!(stats.readings_published, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}
