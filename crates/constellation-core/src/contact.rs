//! Contact windows reported by the flight dynamics service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counterpart class of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactType {
    /// Ground station or user terminal visibility.
    #[serde(rename = "GROUND")]
    GroundOrUser,
    /// Inter-satellite visibility (the service tags these `ISV`).
    #[serde(rename = "ISV")]
    InterSatellite,
}

/// A visibility interval between a satellite and a counterpart asset.
///
/// Both bounds are inclusive. Windows of one counterpart never overlap;
/// windows of different counterparts may.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactWindow {
    /// Counterpart asset id: another satellite for `ISV` contacts, a ground
    /// station or user terminal otherwise.
    #[serde(rename = "argumentOfInterestId")]
    pub counterpart: String,
    #[serde(rename = "startUtcTime")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endUtcTime")]
    pub end: DateTime<Utc>,
    #[serde(rename = "contactType")]
    pub contact_type: ContactType,
}

impl ContactWindow {
    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Closed-interval membership.
    pub fn contains_ms(&self, epoch_ms: i64) -> bool {
        epoch_ms >= self.start_ms() && epoch_ms <= self.end_ms()
    }

    /// A window whose end precedes its start never came out of the
    /// propagation service intact.
    pub fn is_well_formed(&self) -> bool {
        self.end_ms() >= self.start_ms()
    }
}
