//! SQLite reading store
//!
//! ## Connection Model
//!
//! No connection is held between calls: every operation opens its own
//! connection, runs its statement and closes it again. This keeps the store
//! trivially safe to share but bounds throughput to roughly one connection
//! setup per reading, which is fine at sensor cadence (seconds) and becomes
//! the limit well before SQLite itself does.
//!
//! ## Schema
//!
//! The table is created by an embedded migration using
//! `CREATE TABLE IF NOT EXISTS`, so `init` is idempotent and accepts
//! databases that already contain a `sensor_readings` table.
//!
//! Timestamps are written as RFC 3339. Rows without an offset (ISO 8601
//! local time, or SQLite's `YYYY-MM-DD HH:MM:SS`) are read back as UTC.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, ReadingStore};
use super::error::{StorageError, StorageResult};
use super::schema::StoredRecord;
use crate::messages::Reading;

/// Offset-less layouts accepted when reading rows back
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp {value:?}")))
}

pub struct SqliteStore {
    options: SqliteConnectOptions,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the table exists
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use sensor_alerting::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::init("./sensor_data.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn init(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let store = Self { options, db_path };

        let mut conn = store.open().await?;
        debug!("running database migrations");
        let migrated = sqlx::migrate!("./migrations").run(&mut conn).await;
        store.release(conn).await;
        migrated?;

        info!("SQLite store ready");
        Ok(store)
    }

    async fn open(&self) -> StorageResult<SqliteConnection> {
        self.options
            .connect()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    async fn release(&self, conn: SqliteConnection) {
        if let Err(e) = conn.close().await {
            warn!("failed to close SQLite connection: {}", e);
        }
    }

    fn row_to_record(row: SqliteRow) -> StorageResult<StoredRecord> {
        let timestamp: String = row.try_get("timestamp")?;
        let timestamp = parse_timestamp(&timestamp)?;

        Ok(StoredRecord {
            id: row.try_get("id")?,
            sensor_id: row.try_get("sensor_id")?,
            location: row.try_get("location")?,
            temperature: row.try_get("temperature")?,
            timestamp,
            alert_triggered: row.try_get("alert_triggered")?,
        })
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    #[instrument(skip(self, reading), fields(sensor = %reading.sensor_id))]
    async fn record(&self, reading: &Reading, alert_triggered: bool) -> StorageResult<()> {
        let mut conn = self.open().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO sensor_readings
                (sensor_id, location, temperature, timestamp, alert_triggered)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reading.sensor_id)
        .bind(&reading.location)
        .bind(reading.temperature)
        .bind(reading.timestamp.to_rfc3339())
        .bind(alert_triggered)
        .execute(&mut conn)
        .await;

        self.release(conn).await;
        result.map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        trace!("stored reading ({} °C, alert: {alert_triggered})", reading.temperature);
        Ok(())
    }

    async fn count(&self) -> StorageResult<usize> {
        let mut conn = self.open().await?;

        let result: Result<(i64,), _> = sqlx::query_as("SELECT COUNT(*) FROM sensor_readings")
            .fetch_one(&mut conn)
            .await;

        self.release(conn).await;
        let (count,) = result?;
        Ok(count as usize)
    }

    #[instrument(skip(self))]
    async fn latest(&self, sensor_id: &str, limit: usize) -> StorageResult<Vec<StoredRecord>> {
        let mut conn = self.open().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, sensor_id, location, temperature, timestamp, alert_triggered
            FROM sensor_readings
            WHERE sensor_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(sensor_id)
        .bind(limit as i64)
        .fetch_all(&mut conn)
        .await;

        self.release(conn).await;

        let mut records = rows?
            .into_iter()
            .map(Self::row_to_record)
            .collect::<StorageResult<Vec<_>>>()?;

        // Reverse to get chronological order (oldest first)
        records.reverse();
        debug!("query returned {} records", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let probe = match self.open().await {
            Ok(mut conn) => {
                let result = sqlx::query("SELECT 1").fetch_one(&mut conn).await;
                self.release(conn).await;
                result.map(|_| ()).map_err(StorageError::from)
            }
            Err(e) => Err(e),
        };

        match probe {
            Ok(()) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let mut conn = self.open().await?;

        let result: Result<(i64, Option<i64>), _> = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN alert_triggered THEN 1 ELSE 0 END) FROM sensor_readings",
        )
        .fetch_one(&mut conn)
        .await;

        self.release(conn).await;
        let (total_rows, alerts) = result?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} rows, {} alerts, {:.2} MB on disk",
            total_rows,
            alerts.unwrap_or(0),
            file_size_mb
        ))
    }
}
