//! Per-reading pipeline
//!
//! ## Message Flow
//!
//! ```text
//! Reading → publish (data, at-least-once)
//!             │
//!             ├─ ok ──► classify ──► publish alert (exactly-once) ──► persist(alert flag)
//!             │
//!             └─ err ─► [retry per policy] ──► drop
//!                                               └─ persist_on = always ─► classify ──► persist(alert flag)
//! ```
//!
//! Failures never escape a cycle: they are logged, counted and reported in the
//! returned [`CycleOutcome`]. The next cycle generates a fresh reading.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::stats::MonitorStats;
use crate::classifier::{Thresholds, classify};
use crate::delivery::{DeliveryChannel, DeliveryError, DeliveryResult};
use crate::messages::{AlertKind, Reading};
use crate::storage::{ReadingStore, StorageError};

/// When a reading is written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Only readings that were published successfully
    #[default]
    PublishSuccess,

    /// Every generated reading, delivered or not
    Always,
}

/// What to do when a reading cannot be published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PublishFailurePolicy {
    /// Give up on the reading immediately
    #[default]
    Drop,

    /// Retry `attempts` more times, `backoff_ms` apart, then give up
    #[serde(rename = "retry")]
    RetryThenDrop {
        attempts: u32,
        #[serde(default = "default_backoff")]
        backoff_ms: u64,
    },
}

fn default_backoff() -> u64 {
    500
}

/// Result of writing (or not writing) a reading to the store
#[derive(Debug)]
pub enum Persistence {
    Stored,
    Skipped,
    Failed(StorageError),
}

impl Persistence {
    pub fn is_stored(&self) -> bool {
        matches!(self, Persistence::Stored)
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// The reading was published
    Delivered {
        alert: Option<AlertKind>,
        persistence: Persistence,
    },

    /// The reading could not be published
    Dropped {
        error: DeliveryError,
        persistence: Persistence,
    },
}

impl CycleOutcome {
    pub fn persistence(&self) -> &Persistence {
        match self {
            CycleOutcome::Delivered { persistence, .. } => persistence,
            CycleOutcome::Dropped { persistence, .. } => persistence,
        }
    }
}

/// Drives a single reading through delivery, classification and persistence
#[derive(Clone)]
pub struct Pipeline {
    channel: Arc<DeliveryChannel>,
    store: Arc<dyn ReadingStore>,
    thresholds: Thresholds,
    persist_on: PersistPolicy,
    on_publish_failure: PublishFailurePolicy,
    stats: Arc<MonitorStats>,
}

impl Pipeline {
    pub fn new(
        channel: Arc<DeliveryChannel>,
        store: Arc<dyn ReadingStore>,
        thresholds: Thresholds,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            channel,
            store,
            thresholds,
            persist_on: PersistPolicy::default(),
            on_publish_failure: PublishFailurePolicy::default(),
            stats,
        }
    }

    pub fn with_policies(
        mut self,
        persist_on: PersistPolicy,
        on_publish_failure: PublishFailurePolicy,
    ) -> Self {
        self.persist_on = persist_on;
        self.on_publish_failure = on_publish_failure;
        self
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    #[instrument(skip_all, fields(sensor = %reading.sensor_id))]
    pub async fn process(&self, reading: Reading, cancel: &CancellationToken) -> CycleOutcome {
        match self.publish_reading(&reading, cancel).await {
            Ok(()) => {
                self.stats.reading_published();
                info!("reading sent: {} °C", reading.temperature);

                let alert = self.raise_alert(&reading, true).await;
                let persistence = self.persist(&reading, alert.is_some()).await;

                CycleOutcome::Delivered { alert, persistence }
            }
            Err(error) => {
                self.stats.reading_dropped();
                warn!("reading not delivered: {error}");

                let persistence = match self.persist_on {
                    PersistPolicy::PublishSuccess => {
                        trace!("skipping persistence of undelivered reading");
                        Persistence::Skipped
                    }
                    PersistPolicy::Always => {
                        let alert = self.raise_alert(&reading, false).await;
                        self.persist(&reading, alert.is_some()).await
                    }
                };

                CycleOutcome::Dropped { error, persistence }
            }
        }
    }

    async fn publish_reading(
        &self,
        reading: &Reading,
        cancel: &CancellationToken,
    ) -> DeliveryResult<()> {
        let mut result = self.channel.publish_reading(reading).await;

        if let PublishFailurePolicy::RetryThenDrop {
            attempts,
            backoff_ms,
        } = self.on_publish_failure
        {
            let mut attempt = 0;
            while result.is_err() && attempt < attempts {
                attempt += 1;
                debug!("retrying publish ({attempt}/{attempts})");

                tokio::select! {
                    _ = sleep(Duration::from_millis(backoff_ms)) => {}
                    _ = cancel.cancelled() => break,
                }

                result = self.channel.publish_reading(reading).await;
            }
        }

        result
    }

    /// Classify the reading and, if it is deliverable, publish the alert
    async fn raise_alert(&self, reading: &Reading, deliverable: bool) -> Option<AlertKind> {
        let alert = classify(reading, &self.thresholds)?;
        self.stats.alert_raised();

        if !deliverable {
            debug!("alert for undelivered reading not published: {}", alert.message);
            return Some(alert.kind);
        }

        match self.channel.publish_alert(&alert).await {
            Ok(()) => {
                self.stats.alert_published();
                warn!("alert published: {}", alert.message);
            }
            Err(e) => {
                self.stats.alert_failed();
                error!("failed to publish alert ({}): {e}", alert.message);
            }
        }

        Some(alert.kind)
    }

    async fn persist(&self, reading: &Reading, alert_triggered: bool) -> Persistence {
        match self.store.record(reading, alert_triggered).await {
            Ok(()) => {
                self.stats.record_persisted();
                Persistence::Stored
            }
            Err(e) => {
                self.stats.persist_failed();
                error!("failed to persist reading: {e}");
                Persistence::Failed(e)
            }
        }
    }
}
