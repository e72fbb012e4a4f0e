//! Synthetic temperature sensors
//!
//! Readings are drawn from a uniform band around a base temperature. A small
//! fraction of readings receives an additional spike to model anomalies.

use std::ops::Range;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::messages::{CELSIUS, Reading};

/// A registered sensor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SensorIdentity {
    pub id: String,
    pub location: String,
}

impl SensorIdentity {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
        }
    }
}

/// Shape of the generated temperature distribution
#[derive(Debug, Clone)]
pub struct GeneratorProfile {
    pub base: f64,
    pub variation: Range<f64>,

    /// Probability of an anomaly spike per reading
    pub anomaly_probability: f64,
    pub anomaly_spike: Range<f64>,
}

impl Default for GeneratorProfile {
    fn default() -> Self {
        Self {
            base: 22.0,
            variation: -3.0..8.0,
            anomaly_probability: 0.05,
            anomaly_spike: 15.0..25.0,
        }
    }
}

/// Produces readings for any sensor from a single random source
#[derive(Debug)]
pub struct ReadingGenerator {
    rng: StdRng,
    profile: GeneratorProfile,
}

impl ReadingGenerator {
    pub fn new(profile: GeneratorProfile) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            profile,
        }
    }

    /// Deterministic generator, used for reproducible runs and tests
    pub fn seeded(seed: u64, profile: GeneratorProfile) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            profile,
        }
    }

    pub fn generate(&mut self, sensor: &SensorIdentity) -> Reading {
        Reading {
            sensor_id: sensor.id.clone(),
            location: sensor.location.clone(),
            temperature: self.temperature(),
            timestamp: Utc::now(),
            unit: CELSIUS.to_string(),
        }
    }

    fn temperature(&mut self) -> f64 {
        let mut variation = self.rng.gen_range(self.profile.variation.clone());

        if self.rng.gen_bool(self.profile.anomaly_probability) {
            variation += self.rng.gen_range(self.profile.anomaly_spike.clone());
        }

        round_to_hundredths(self.profile.base + variation)
    }
}

impl Default for ReadingGenerator {
    fn default() -> Self {
        Self::new(GeneratorProfile::default())
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
