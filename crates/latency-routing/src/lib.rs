//! Greedy Multi-Hop Router
//!
//! Finds a path across the inter-satellite mesh from a geographic origin to
//! a destination anchor satellite and converts the accumulated geometric
//! distance into one-way propagation delay.
//!
//! The hop selection is a one-step-lookahead greedy heuristic: from the
//! current satellite, each unvisited candidate neighbor is scored by its
//! own distance to the destination plus the best onward distance among the
//! candidate's unvisited neighbors. This dodges some local minima of pure
//! nearest-neighbor greediness but performs no backtracking, so it is not
//! guaranteed optimal; the `exact` module holds a Dijkstra reference router
//! for validation runs.

use chrono::{DateTime, Utc};
use constellation_core::{
    distance_m, CoreError, EciPosition, SatelliteId, Trajectory, SPEED_OF_LIGHT_M_S,
};
use mesh_topology::{MeshResolver, TopologyError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, trace};

pub mod exact;
pub mod gate;
pub mod sweep;

pub use gate::ContactGate;
pub use sweep::{LatencyGrid, LatencySweep, SweepConfig, SweepPolicy};

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("no reachable unvisited neighbor at {at} after {hops} hops")]
    DeadEnd { at: SatelliteId, hops: usize },
    #[error("no satellite has a state at the query epoch")]
    EmptyConstellation,
    #[error("satellite {0} has no state at the query epoch")]
    UnknownSatellite(SatelliteId),
    #[error("no path between {from} and {to} over the gated mesh")]
    NoPath { from: SatelliteId, to: SatelliteId },
    #[error("routing exceeded the {max}-hop bound, visited set must be leaking")]
    HopBudgetExceeded { max: usize },
    #[error("latency sweep aborted at lat {lat_deg} deg, lon {lon_deg} deg: {source}")]
    SweepAborted {
        lat_deg: f64,
        lon_deg: f64,
        #[source]
        source: Box<RoutingError>,
    },
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Id(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, RoutingError>;

/// Read-only per-satellite positions at a single epoch, the router's view
/// of the constellation. Safe to share across sweep worker threads.
#[derive(Debug, Clone)]
pub struct ConstellationSnapshot {
    epoch: DateTime<Utc>,
    positions: HashMap<SatelliteId, EciPosition>,
    skipped: Vec<String>,
}

impl ConstellationSnapshot {
    /// Positions of every satellite whose trajectory holds a sample at
    /// exactly `epoch`. Satellites sampled on a different grid are left
    /// out and reported via [`skipped`](Self::skipped); a key that is not
    /// a well-formed satellite id is an error.
    pub fn from_trajectories(
        trajectories: &HashMap<String, Trajectory>,
        epoch: DateTime<Utc>,
    ) -> Result<Self> {
        let epoch_ms = epoch.timestamp_millis();
        let mut positions = HashMap::new();
        let mut skipped = Vec::new();
        for (raw_id, trajectory) in trajectories {
            let id: SatelliteId = raw_id.parse().map_err(RoutingError::Id)?;
            match trajectory.sample_at(epoch_ms) {
                Some(sample) => {
                    positions.insert(id, sample.position_m());
                }
                None => skipped.push(raw_id.clone()),
            }
        }
        skipped.sort();
        Ok(Self {
            epoch,
            positions,
            skipped,
        })
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Satellites that had no sample at the snapshot epoch.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn position(&self, id: &SatelliteId) -> Option<&EciPosition> {
        self.positions.get(id)
    }

    pub fn satellites(&self) -> impl Iterator<Item = (&SatelliteId, &EciPosition)> {
        self.positions.iter()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Satellite nearest to `point`, with its distance [m].
    pub fn nearest_to(&self, point: &EciPosition) -> Option<(&SatelliteId, f64)> {
        self.positions
            .iter()
            .map(|(id, pos)| (id, distance_m(pos, point)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)))
    }
}

/// A resolved route: hop sequence from the origin's anchor satellite to
/// the destination anchor, the accumulated geometric distance (including
/// the origin-to-first-hop leg) and the derived one-way delay.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePath {
    pub hops: Vec<SatelliteId>,
    pub total_distance_m: f64,
    pub one_way_delay_s: f64,
}

impl RoutePath {
    fn new(hops: Vec<SatelliteId>, total_distance_m: f64) -> Self {
        Self {
            hops,
            total_distance_m,
            one_way_delay_s: total_distance_m / SPEED_OF_LIGHT_M_S,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }
}

/// Greedy lookahead router over a resolver-defined mesh.
#[derive(Debug, Clone, Copy)]
pub struct Router {
    resolver: MeshResolver,
}

impl Router {
    pub fn new(resolver: MeshResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &MeshResolver {
        &self.resolver
    }

    /// Route over the full static mesh: every topology neighbor is assumed
    /// reachable.
    pub fn route(
        &self,
        origin: &EciPosition,
        destination: &SatelliteId,
        snapshot: &ConstellationSnapshot,
    ) -> Result<RoutePath> {
        self.route_gated(origin, destination, snapshot, |_, _| true)
    }

    /// Route with an injected link availability predicate: a topology
    /// neighbor is only a candidate when `reachable(current, neighbor)`
    /// holds. [`ContactGate`] builds the contact-window variant.
    pub fn route_gated(
        &self,
        origin: &EciPosition,
        destination: &SatelliteId,
        snapshot: &ConstellationSnapshot,
        reachable: impl Fn(&SatelliteId, &SatelliteId) -> bool,
    ) -> Result<RoutePath> {
        let dest_pos = *snapshot
            .position(destination)
            .ok_or_else(|| RoutingError::UnknownSatellite(destination.clone()))?;
        let (first, origin_leg_m) = snapshot
            .nearest_to(origin)
            .ok_or(RoutingError::EmptyConstellation)?;
        let first = first.clone();
        trace!(%first, origin_leg_m, "anchored origin to nearest satellite");

        let max_hops = self.resolver.shape().total_satellites() as usize;
        let mut hops = vec![first.clone()];
        let mut visited: HashSet<SatelliteId> = HashSet::from([first.clone()]);
        let mut total_m = origin_leg_m;
        let mut current = first;

        while current != *destination {
            if hops.len() > max_hops {
                return Err(RoutingError::HopBudgetExceeded { max: max_hops });
            }
            let next = self.pick_next(&current, destination, &dest_pos, snapshot, &visited, &reachable)?;
            let current_pos = snapshot
                .position(&current)
                .ok_or_else(|| RoutingError::UnknownSatellite(current.clone()))?;
            let next_pos = snapshot
                .position(&next)
                .ok_or_else(|| RoutingError::UnknownSatellite(next.clone()))?;
            total_m += distance_m(current_pos, next_pos);
            visited.insert(next.clone());
            hops.push(next.clone());
            current = next;
        }

        debug!(
            hops = hops.len(),
            total_m,
            destination = %destination,
            "route complete"
        );
        Ok(RoutePath::new(hops, total_m))
    }

    /// Candidate selection: destination wins outright when adjacent;
    /// otherwise minimize candidate-to-destination distance plus the
    /// candidate's best onward hop. Candidates whose onward neighborhood
    /// is exhausted rank last but still beat a dead end.
    fn pick_next(
        &self,
        current: &SatelliteId,
        destination: &SatelliteId,
        dest_pos: &EciPosition,
        snapshot: &ConstellationSnapshot,
        visited: &HashSet<SatelliteId>,
        reachable: &impl Fn(&SatelliteId, &SatelliteId) -> bool,
    ) -> Result<SatelliteId> {
        let candidates = self.open_neighbors(current, snapshot, visited, reachable)?;
        if candidates.is_empty() {
            return Err(RoutingError::DeadEnd {
                at: current.clone(),
                hops: visited.len(),
            });
        }
        if let Some((dest, _)) = candidates.iter().find(|(id, _)| id == destination) {
            return Ok(dest.clone());
        }

        let mut best: Option<(bool, f64, SatelliteId)> = None;
        for (candidate, pos) in &candidates {
            let direct = distance_m(pos, dest_pos);
            let onward = self
                .open_neighbors(candidate, snapshot, visited, reachable)?
                .iter()
                .map(|(_, p)| distance_m(p, dest_pos))
                .min_by(f64::total_cmp);
            // (has_onward, cost): exhausted candidates sort after live ones.
            let key = match onward {
                Some(next_leg) => (true, direct + next_leg),
                None => (false, direct),
            };
            let better = match &best {
                None => true,
                Some((has_onward, cost, _)) => {
                    key.0 == *has_onward && key.1 < *cost || key.0 && !*has_onward
                }
            };
            if better {
                best = Some((key.0, key.1, candidate.clone()));
            }
        }
        // candidates is non-empty, so best is set by the loop above.
        best.map(|(_, _, id)| id).ok_or_else(|| RoutingError::DeadEnd {
            at: current.clone(),
            hops: visited.len(),
        })
    }

    /// Unvisited, reachable topology neighbors that have a position in the
    /// snapshot.
    fn open_neighbors(
        &self,
        of: &SatelliteId,
        snapshot: &ConstellationSnapshot,
        visited: &HashSet<SatelliteId>,
        reachable: &impl Fn(&SatelliteId, &SatelliteId) -> bool,
    ) -> Result<Vec<(SatelliteId, EciPosition)>> {
        let neighbors = self.resolver.neighbors(of)?;
        Ok(neighbors
            .into_iter()
            .filter(|n| !visited.contains(n))
            .filter(|n| reachable(of, n))
            .filter_map(|n| snapshot.position(&n).map(|p| (n, *p)))
            .collect())
    }
}
