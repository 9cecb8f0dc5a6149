//! Propagated orbit states.

use crate::geometry::EciPosition;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One propagated state: inertial position/velocity at a UTC epoch.
///
/// Field names on the wire follow the flight dynamics service
/// (`utcTime`, `X`..`Vz`), positions in meters, velocities in m/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSample {
    #[serde(rename = "utcTime")]
    pub epoch: DateTime<Utc>,
    #[serde(rename = "X")]
    pub x_m: f64,
    #[serde(rename = "Y")]
    pub y_m: f64,
    #[serde(rename = "Z")]
    pub z_m: f64,
    #[serde(rename = "Vx", default)]
    pub vx_mps: f64,
    #[serde(rename = "Vy", default)]
    pub vy_mps: f64,
    #[serde(rename = "Vz", default)]
    pub vz_mps: f64,
}

impl StateSample {
    pub fn position_m(&self) -> EciPosition {
        [self.x_m, self.y_m, self.z_m]
    }

    /// Epoch as UTC milliseconds, the resolution contact windows and
    /// cross-trajectory lookups are keyed on.
    pub fn epoch_ms(&self) -> i64 {
        self.epoch.timestamp_millis()
    }
}

/// A satellite's propagated trajectory: state samples with strictly
/// increasing timestamps, immutable once produced by the propagation
/// service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Trajectory {
    samples: Vec<StateSample>,
}

impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let samples = Vec::<StateSample>::deserialize(deserializer)?;
        Trajectory::new(samples).map_err(serde::de::Error::custom)
    }
}

impl Trajectory {
    pub fn new(samples: Vec<StateSample>) -> Result<Self> {
        for (index, pair) in samples.windows(2).enumerate() {
            if pair[1].epoch_ms() <= pair[0].epoch_ms() {
                return Err(CoreError::UnorderedTrajectory { index: index + 1 });
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[StateSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at exactly `epoch_ms`, if the trajectory has one.
    pub fn sample_at(&self, epoch_ms: i64) -> Option<&StateSample> {
        self.samples
            .binary_search_by_key(&epoch_ms, StateSample::epoch_ms)
            .ok()
            .map(|i| &self.samples[i])
    }

    /// Index of the first sample with timestamp >= `epoch_ms`.
    pub fn first_at_or_after(&self, epoch_ms: i64) -> usize {
        self.samples.partition_point(|s| s.epoch_ms() < epoch_ms)
    }

    pub fn first_epoch(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.epoch)
    }

    pub fn last_epoch(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.epoch)
    }
}
