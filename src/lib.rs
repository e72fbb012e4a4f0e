//! Temperature sensor alerting pipeline
//!
//! Synthetic sensors produce readings that are published to a messaging
//! backend, classified against alert thresholds and stored in a local
//! database. See [`monitor::Monitor`] for the orchestrating state machine.

pub mod classifier;
pub mod config;
pub mod delivery;
pub mod messages;
pub mod monitor;
pub mod sensor;
pub mod storage;
pub mod util;
