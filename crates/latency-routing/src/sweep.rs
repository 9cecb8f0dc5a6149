//! Latency grid sweeps.
//!
//! Evaluates one-way signal delay from user terminals spread over a
//! latitude/longitude grid to a fixed destination point, routing each cell
//! through the mesh to the destination's anchor satellite. Cells are
//! independent, so rows run on the rayon pool against a shared read-only
//! snapshot.

use crate::{ConstellationSnapshot, Router, RoutingError, Result};
use constellation_core::{GeoPoint, SatelliteId, SPEED_OF_LIGHT_M_S};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What to do when a grid cell hits a routing dead end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepPolicy {
    /// Abort the whole sweep on the first failed cell.
    FailFast,
    /// Record the failure, leave the cell empty and keep going.
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Destination ground point; its nearest satellite becomes the route
    /// anchor and the destination ground leg is added to every cell delay.
    pub destination: GeoPoint,
    /// Grid step in degrees.
    pub grid_step_deg: f64,
    pub policy: SweepPolicy,
}

impl SweepConfig {
    pub fn new(destination: GeoPoint) -> Self {
        Self {
            destination,
            grid_step_deg: 5.0,
            policy: SweepPolicy::BestEffort,
        }
    }
}

/// A cell that could not be routed.
#[derive(Debug, Clone, Serialize)]
pub struct CellFailure {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub reason: String,
}

/// Sweep result: per-cell one-way delays in milliseconds, row per
/// latitude, plus the worst user location and the cells that failed.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyGrid {
    pub destination: GeoPoint,
    pub anchor: SatelliteId,
    pub lats_deg: Vec<f64>,
    pub lons_deg: Vec<f64>,
    pub delay_ms: Vec<Vec<Option<f64>>>,
    pub worst: Option<WorstUserLocation>,
    pub failures: Vec<CellFailure>,
}

/// The grid cell with the highest delay (the "WUL" of the flight reports).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorstUserLocation {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub delay_ms: f64,
}

/// Grid evaluator bound to a router and a snapshot.
pub struct LatencySweep<'a> {
    router: &'a Router,
    snapshot: &'a ConstellationSnapshot,
}

impl<'a> LatencySweep<'a> {
    pub fn new(router: &'a Router, snapshot: &'a ConstellationSnapshot) -> Self {
        Self { router, snapshot }
    }

    /// Sweep over the full static mesh.
    pub fn run(&self, config: &SweepConfig) -> Result<LatencyGrid> {
        self.run_gated(config, |_, _| true)
    }

    /// Sweep with an injected link availability predicate (see
    /// [`Router::route_gated`]).
    pub fn run_gated(
        &self,
        config: &SweepConfig,
        reachable: impl Fn(&SatelliteId, &SatelliteId) -> bool + Sync,
    ) -> Result<LatencyGrid> {
        let epoch = self.snapshot.epoch();
        let dest_eci = config.destination.to_eci(epoch);
        let (anchor, dest_leg_m) = self
            .snapshot
            .nearest_to(&dest_eci)
            .ok_or(RoutingError::EmptyConstellation)?;
        let anchor = anchor.clone();
        info!(%anchor, dest_leg_m, step = config.grid_step_deg, "starting latency sweep");

        let lats = grid_axis(-90.0, 90.0, config.grid_step_deg);
        let lons = grid_axis(-180.0, 180.0, config.grid_step_deg);

        let mut delay_ms: Vec<Vec<Option<f64>>> = Vec::with_capacity(lats.len());
        let mut failures = Vec::new();

        // Rows run sequentially so fail-fast stops before touching the
        // rest of the globe; cells within a row fan out on rayon.
        for &lat in &lats {
            let row: Vec<(f64, std::result::Result<f64, RoutingError>)> = lons
                .par_iter()
                .map(|&lon| {
                    let origin = GeoPoint::surface(lat, lon).to_eci(epoch);
                    let cell = self
                        .router
                        .route_gated(&origin, &anchor, self.snapshot, &reachable)
                        .map(|path| {
                            (path.total_distance_m + dest_leg_m) / SPEED_OF_LIGHT_M_S * 1_000.0
                        });
                    (lon, cell)
                })
                .collect();

            let mut out_row = Vec::with_capacity(lons.len());
            for (lon, cell) in row {
                match cell {
                    Ok(ms) => out_row.push(Some(ms)),
                    Err(err) => {
                        if config.policy == SweepPolicy::FailFast {
                            return Err(RoutingError::SweepAborted {
                                lat_deg: lat,
                                lon_deg: lon,
                                source: Box::new(err),
                            });
                        }
                        warn!(lat, lon, %err, "cell failed, continuing best effort");
                        failures.push(CellFailure {
                            lat_deg: lat,
                            lon_deg: lon,
                            reason: err.to_string(),
                        });
                        out_row.push(None);
                    }
                }
            }
            delay_ms.push(out_row);
            debug!(lat, "latency row complete");
        }

        let worst = find_worst(&lats, &lons, &delay_ms);
        Ok(LatencyGrid {
            destination: config.destination,
            anchor,
            lats_deg: lats,
            lons_deg: lons,
            delay_ms,
            worst,
            failures,
        })
    }
}

fn grid_axis(start: f64, end: f64, step: f64) -> Vec<f64> {
    let mut axis = Vec::new();
    let mut v = start;
    // Half-step tolerance keeps the closing bound on the axis despite
    // floating point accumulation.
    while v <= end + step / 2.0 {
        axis.push(v);
        v += step;
    }
    axis
}

fn find_worst(
    lats: &[f64],
    lons: &[f64],
    delay_ms: &[Vec<Option<f64>>],
) -> Option<WorstUserLocation> {
    let mut worst: Option<WorstUserLocation> = None;
    for (i, row) in delay_ms.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            if let Some(ms) = cell {
                if worst.map_or(true, |w| *ms > w.delay_ms) {
                    worst = Some(WorstUserLocation {
                        lat_deg: lats[i],
                        lon_deg: lons[j],
                        delay_ms: *ms,
                    });
                }
            }
        }
    }
    worst
}
