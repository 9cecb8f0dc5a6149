//! Mesh Topology Resolver
//!
//! Derives the four direct inter-satellite links of a satellite from its
//! grid position (plane, index-in-plane) and the constellation shape.
//!
//! Two interconnection patterns are supported: "Flat X" (parallel offset)
//! and "Ital X" (crossed). Both give every satellite its two in-plane ring
//! neighbors plus one neighbor in each adjacent plane; the patterns differ
//! in which of the two phase-straddling satellites the cross-plane link
//! picks. At the seam between the last plane and plane 1 the ascending and
//! descending node directions reverse, so the cross-plane index is mirrored
//! instead of offset.

use constellation_core::{ConstellationShape, CoreError, SatelliteId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error(transparent)]
    Id(#[from] CoreError),
    #[error("satellite {id} is outside the {planes}x{sats} constellation grid")]
    OutOfShape { id: SatelliteId, planes: u32, sats: u32 },
    #[error("neighbor derivation for {id} produced out-of-range plane {plane}, index {index}")]
    InvariantViolation { id: SatelliteId, plane: u32, index: u32 },
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Interconnection pattern of the inter-satellite mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshPattern {
    /// "Flat X": cross-plane links lean with the half-spacing plane phasing.
    #[serde(rename = "flat-x")]
    ParallelOffset,
    /// "Ital X": cross-plane links lean against the phasing.
    #[serde(rename = "ital-x")]
    Crossed,
}

impl fmt::Display for MeshPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshPattern::ParallelOffset => write!(f, "Flat X"),
            MeshPattern::Crossed => write!(f, "Ital X"),
        }
    }
}

enum Cross {
    TowardLower,
    TowardHigher,
}

/// Pure neighbor resolver: a pattern plus the constellation constants.
/// Carries no per-run state and may be shared freely across threads.
#[derive(Debug, Clone, Copy)]
pub struct MeshResolver {
    pattern: MeshPattern,
    shape: ConstellationShape,
}

impl MeshResolver {
    pub fn new(pattern: MeshPattern, shape: ConstellationShape) -> Self {
        Self { pattern, shape }
    }

    pub fn pattern(&self) -> MeshPattern {
        self.pattern
    }

    pub fn shape(&self) -> ConstellationShape {
        self.shape
    }

    /// The four directly linked neighbors of `id`: in-plane predecessor and
    /// successor, and one satellite in each adjacent plane.
    pub fn neighbors(&self, id: &SatelliteId) -> Result<[SatelliteId; 4]> {
        let plane = id.plane();
        let index = id.index_in_plane();
        if !self.shape.contains(plane, index) {
            return Err(TopologyError::OutOfShape {
                id: id.clone(),
                planes: self.shape.total_planes(),
                sats: self.shape.sats_per_plane(),
            });
        }

        let ring_up = self.wrap_index(index as i64 + 1);
        let ring_down = self.wrap_index(index as i64 - 1);
        let (lower_plane, lower_index) = self.cross_plane(plane, index, Cross::TowardLower);
        let (higher_plane, higher_index) = self.cross_plane(plane, index, Cross::TowardHigher);

        let derived = [
            (plane, ring_up),
            (plane, ring_down),
            (lower_plane, lower_index),
            (higher_plane, higher_index),
        ];
        for (p, i) in derived {
            if !self.shape.contains(p, i) {
                return Err(TopologyError::InvariantViolation {
                    id: id.clone(),
                    plane: p,
                    index: i,
                });
            }
        }
        trace!(%id, pattern = %self.pattern, ?derived, "resolved mesh neighbors");

        Ok(derived.map(|(p, i)| id.at_position(p, i)))
    }

    /// Parse a wire-format id and resolve its neighbors.
    pub fn neighbors_of(&self, raw: &str) -> Result<[SatelliteId; 4]> {
        let id: SatelliteId = raw.parse().map_err(TopologyError::Id)?;
        self.neighbors(&id)
    }

    /// Cross-plane link of `(plane, index)` in the given direction.
    ///
    /// Off-seam the target index carries a phase offset decided by the
    /// pattern and the parity of the lower plane of the crossed pair;
    /// crossing the seam (last plane <-> plane 1) mirrors the index
    /// instead. Both rules are involutions, so the link is symmetric.
    fn cross_plane(&self, plane: u32, index: u32, direction: Cross) -> (u32, u32) {
        let planes = self.shape.total_planes();
        match direction {
            Cross::TowardHigher => {
                if plane == planes {
                    (1, self.seam_mirror_index(index))
                } else {
                    let offset = self.phase_offset(plane);
                    (plane + 1, self.wrap_index(index as i64 + offset))
                }
            }
            Cross::TowardLower => {
                if plane == 1 {
                    (planes, self.seam_mirror_index(index))
                } else {
                    let offset = self.phase_offset(plane - 1);
                    (plane - 1, self.wrap_index(index as i64 - offset))
                }
            }
        }
    }

    /// In-plane offset of the off-seam cross link, keyed on the parity of
    /// the lower plane of the crossed pair. Adjacent planes are phase
    /// shifted by half an inter-satellite spacing; ParallelOffset picks the
    /// satellite ahead of the shift, Crossed the one behind.
    fn phase_offset(&self, lower_plane: u32) -> i64 {
        let leaning = (lower_plane % 2) as i64;
        match self.pattern {
            MeshPattern::ParallelOffset => leaning,
            MeshPattern::Crossed => 1 - leaning,
        }
    }

    /// Mirrored index across the seam: `sats/2 - index`, with the
    /// pattern-specific corrective delta, normalized into `1..=sats`.
    fn seam_mirror_index(&self, index: u32) -> u32 {
        let half = (self.shape.sats_per_plane() / 2) as i64;
        let delta = match self.pattern {
            MeshPattern::ParallelOffset => -1,
            MeshPattern::Crossed => 0,
        };
        self.wrap_index(half + delta - index as i64)
    }

    /// 1-based modular wrap over the in-plane ring.
    fn wrap_index(&self, index: i64) -> u32 {
        let sats = self.shape.sats_per_plane() as i64;
        ((index - 1).rem_euclid(sats) + 1) as u32
    }
}
