//! Constellation Core Library
//!
//! Shared primitives for the mesh latency engine: structured satellite
//! identifiers, constellation shape constants, inertial-frame geometry and
//! contact window types exchanged with the flight dynamics service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod contact;
pub mod geometry;
pub mod state;

pub use contact::{ContactType, ContactWindow};
pub use geometry::{distance_m, EciPosition, GeoPoint};
pub use state::{StateSample, Trajectory};

/// Speed of light [m/s], used to convert path length to propagation delay.
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Mean Earth radius [m].
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("malformed satellite id '{id}': {reason}")]
    MalformedId { id: String, reason: String },
    #[error("invalid constellation shape: {0}")]
    InvalidShape(String),
    #[error("trajectory timestamps not strictly increasing at sample {index}")]
    UnorderedTrajectory { index: usize },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Structured satellite identifier.
///
/// Wire format: `<prefix>-<tag>-P<plane>-<index>`, plane and index 1-based
/// and zero-padded to two digits, e.g. `rsn-A-P03-07` for plane 3,
/// satellite 7. Constellation-wide totals are NOT encoded in the id; they
/// travel separately as a [`ConstellationShape`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SatelliteId {
    prefix: String,
    tag: String,
    plane: u32,
    index_in_plane: u32,
}

impl SatelliteId {
    /// Build an id from its parts. Plane and index are 1-based and must be
    /// positive; range checks against the constellation shape are the
    /// resolver's business.
    pub fn new(prefix: &str, tag: &str, plane: u32, index_in_plane: u32) -> Result<Self> {
        if prefix.is_empty() || prefix.contains('-') {
            return Err(CoreError::MalformedId {
                id: format!("{prefix}-{tag}-P{plane:02}-{index_in_plane:02}"),
                reason: "prefix must be non-empty and free of '-'".into(),
            });
        }
        if tag.is_empty() || tag.contains('-') {
            return Err(CoreError::MalformedId {
                id: format!("{prefix}-{tag}-P{plane:02}-{index_in_plane:02}"),
                reason: "constellation tag must be non-empty and free of '-'".into(),
            });
        }
        if plane == 0 || index_in_plane == 0 {
            return Err(CoreError::MalformedId {
                id: format!("{prefix}-{tag}-P{plane:02}-{index_in_plane:02}"),
                reason: "plane and index are 1-based".into(),
            });
        }
        Ok(Self {
            prefix: prefix.to_string(),
            tag: tag.to_string(),
            plane,
            index_in_plane,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// 1-based orbital plane.
    pub fn plane(&self) -> u32 {
        self.plane
    }

    /// 1-based slot within the plane.
    pub fn index_in_plane(&self) -> u32 {
        self.index_in_plane
    }

    /// Sibling id in the same constellation at another grid position.
    pub fn at_position(&self, plane: u32, index_in_plane: u32) -> Self {
        Self {
            prefix: self.prefix.clone(),
            tag: self.tag.clone(),
            plane,
            index_in_plane,
        }
    }
}

impl fmt::Display for SatelliteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-P{:02}-{:02}",
            self.prefix, self.tag, self.plane, self.index_in_plane
        )
    }
}

impl FromStr for SatelliteId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = |reason: &str| CoreError::MalformedId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = s.split('-').collect();
        if segments.len() != 4 {
            return Err(malformed("expected 4 '-' separated segments"));
        }
        let (prefix, tag, plane_seg, index_seg) =
            (segments[0], segments[1], segments[2], segments[3]);
        if prefix.is_empty() || tag.is_empty() {
            return Err(malformed("empty prefix or constellation tag"));
        }
        let plane_digits = plane_seg
            .strip_prefix('P')
            .ok_or_else(|| malformed("plane segment must start with 'P'"))?;
        let plane: u32 = plane_digits
            .parse()
            .map_err(|_| malformed("non-numeric plane"))?;
        let index_in_plane: u32 = index_seg
            .parse()
            .map_err(|_| malformed("non-numeric index in plane"))?;
        if plane == 0 || index_in_plane == 0 {
            return Err(malformed("plane and index are 1-based"));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            tag: tag.to_string(),
            plane,
            index_in_plane,
        })
    }
}

impl Serialize for SatelliteId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SatelliteId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Constellation-wide grid constants, supplied by the caller per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstellationShape {
    total_planes: u32,
    sats_per_plane: u32,
}

impl ConstellationShape {
    /// Validated constructor. The mesh rules need at least 3 planes and 4
    /// satellites per plane for the four neighbors to be distinct, and an
    /// even in-plane count for the seam mirror midpoint.
    pub fn new(total_planes: u32, sats_per_plane: u32) -> Result<Self> {
        if total_planes < 3 {
            return Err(CoreError::InvalidShape(format!(
                "total planes must be >= 3, got {total_planes}"
            )));
        }
        if sats_per_plane < 4 {
            return Err(CoreError::InvalidShape(format!(
                "satellites per plane must be >= 4, got {sats_per_plane}"
            )));
        }
        if sats_per_plane % 2 != 0 {
            return Err(CoreError::InvalidShape(format!(
                "satellites per plane must be even, got {sats_per_plane}"
            )));
        }
        Ok(Self {
            total_planes,
            sats_per_plane,
        })
    }

    pub fn total_planes(&self) -> u32 {
        self.total_planes
    }

    pub fn sats_per_plane(&self) -> u32 {
        self.sats_per_plane
    }

    pub fn total_satellites(&self) -> u32 {
        self.total_planes * self.sats_per_plane
    }

    /// True when the 1-based plane/index pair lies on the grid.
    pub fn contains(&self, plane: u32, index_in_plane: u32) -> bool {
        (1..=self.total_planes).contains(&plane)
            && (1..=self.sats_per_plane).contains(&index_in_plane)
    }
}
