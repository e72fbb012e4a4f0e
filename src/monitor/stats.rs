//! Counters maintained by the monitoring loop

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MonitorStats {
    cycles: AtomicU64,
    readings_published: AtomicU64,
    readings_dropped: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_published: AtomicU64,
    alerts_failed: AtomicU64,
    records_persisted: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Completed passes over all sensors
    pub cycles: u64,
    pub readings_published: u64,

    /// Readings whose publish failed (after retries, if any)
    pub readings_dropped: u64,
    pub alerts_raised: u64,
    pub alerts_published: u64,
    pub alerts_failed: u64,
    pub records_persisted: u64,
    pub persist_failures: u64,
}

impl MonitorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    pub(super) fn cycle_completed(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn reading_published(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn reading_dropped(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn alert_raised(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn alert_published(&self) {
        self.alerts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn alert_failed(&self) {
        self.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_persisted(&self) {
        self.records_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn persist_failed(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }
}
