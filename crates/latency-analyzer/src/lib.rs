//! Analysis helpers behind the `analyze-latency` binary: propagation data
//! loading, mesh neighbor tables and contact extraction summaries.

use chrono::{DateTime, Utc};
use constellation_core::{ContactWindow, CoreError, Trajectory};
use contact_states::ExtractError;
use latency_routing::RoutingError;
use mesh_topology::{MeshResolver, TopologyError};
use propagation_client::PropagationData;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("propagation data parse: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("propagation data holds no common epoch across satellites")]
    NoCommonEpoch,
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Read a propagation data file (the flight dynamics service output,
/// keyed by satellite id).
pub fn load_propagation_data(path: &Path) -> Result<PropagationData> {
    let reader = BufReader::new(File::open(path)?);
    let data: PropagationData = serde_json::from_reader(reader)?;
    info!(satellites = data.len(), ?path, "loaded propagation data");
    Ok(data)
}

/// Per-satellite trajectories, keyed by wire id.
pub fn trajectories(data: &PropagationData) -> HashMap<String, Trajectory> {
    data.iter()
        .map(|(id, sat)| (id.clone(), sat.orbit_state_list.clone()))
        .collect()
}

/// Per-satellite contact windows, keyed by wire id.
pub fn contacts(data: &PropagationData) -> HashMap<String, Vec<ContactWindow>> {
    data.iter()
        .map(|(id, sat)| (id.clone(), sat.contact_list.clone()))
        .collect()
}

/// Earliest epoch sampled by every satellite, the natural snapshot time
/// for topology queries.
pub fn first_common_epoch(data: &PropagationData) -> Result<DateTime<Utc>> {
    let mut common: Option<BTreeSet<i64>> = None;
    for sat in data.values() {
        let epochs: BTreeSet<i64> = sat
            .orbit_state_list
            .samples()
            .iter()
            .map(|s| s.epoch_ms())
            .collect();
        common = Some(match common {
            None => epochs,
            Some(c) => c.intersection(&epochs).cloned().collect(),
        });
    }
    common
        .and_then(|c| c.first().cloned())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or(AnalyzerError::NoCommonEpoch)
}

/// The resolved mesh: every satellite's four neighbors, by wire id.
#[derive(Debug, Serialize)]
pub struct NeighborTable {
    pub pattern: String,
    pub neighbors: BTreeMap<String, Vec<String>>,
}

pub fn neighbor_table(resolver: &MeshResolver, data: &PropagationData) -> Result<NeighborTable> {
    let mut neighbors = BTreeMap::new();
    for raw_id in data.keys() {
        let linked = resolver.neighbors_of(raw_id)?;
        neighbors.insert(
            raw_id.clone(),
            linked.iter().map(|n| n.to_string()).collect(),
        );
    }
    Ok(NeighborTable {
        pattern: resolver.pattern().to_string(),
        neighbors,
    })
}

/// Contact extraction summary for one counterpart of one satellite.
#[derive(Debug, Serialize)]
pub struct CounterpartSummary {
    pub counterpart: String,
    pub windows: usize,
    pub states: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_deputy_distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deputy_distance_m: Option<f64>,
}

/// Per-satellite contact extraction report: how many trajectory states
/// fall inside each counterpart's windows, with the deputy distance range
/// for inter-satellite links.
#[derive(Debug, Serialize)]
pub struct ContactReport {
    pub satellites: BTreeMap<String, Vec<CounterpartSummary>>,
}

pub fn contact_report(data: &PropagationData) -> Result<ContactReport> {
    let all_trajectories = trajectories(data);
    let mut satellites = BTreeMap::new();

    for (sat_id, sat) in data {
        let extracted = contact_states::extract_states(
            &sat.orbit_state_list,
            &sat.contact_list,
            &all_trajectories,
        )?;
        let mut summaries: Vec<CounterpartSummary> = extracted
            .into_iter()
            .map(|(counterpart, states)| {
                let distances: Vec<f64> = states
                    .iter()
                    .flat_map(|s| s.deputy_distances_m.values().cloned())
                    .collect();
                let windows = sat
                    .contact_list
                    .iter()
                    .filter(|w| w.counterpart == counterpart)
                    .count();
                CounterpartSummary {
                    counterpart,
                    windows,
                    states: states.len(),
                    min_deputy_distance_m: distances.iter().cloned().reduce(f64::min),
                    max_deputy_distance_m: distances.iter().cloned().reduce(f64::max),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.counterpart.cmp(&b.counterpart));
        satellites.insert(sat_id.clone(), summaries);
    }
    Ok(ContactReport { satellites })
}

/// Pretty-print any serializable artifact to `path`.
pub fn write_artifact<T: Serialize>(path: &Path, artifact: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, artifact)?;
    info!(?path, "wrote artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use constellation_core::{ConstellationShape, ContactType, StateSample};
    use mesh_topology::MeshPattern;
    use propagation_client::SatelliteData;

    fn make_sample(sec: i64, x: f64) -> StateSample {
        StateSample {
            epoch: Utc.timestamp_opt(sec, 0).unwrap(),
            x_m: x,
            y_m: 0.0,
            z_m: 0.0,
            vx_mps: 0.0,
            vy_mps: 0.0,
            vz_mps: 0.0,
        }
    }

    fn make_sat(start: i64, n: i64, x: f64, contacts: Vec<ContactWindow>) -> SatelliteData {
        SatelliteData {
            orbit_state_list: Trajectory::new(
                (start..start + n).map(|s| make_sample(s, x)).collect(),
            )
            .unwrap(),
            contact_list: contacts,
        }
    }

    #[test]
    fn common_epoch_is_intersection_minimum() {
        let mut data = PropagationData::new();
        data.insert("rsn-A-P01-01".to_string(), make_sat(0, 10, 0.0, vec![]));
        data.insert("rsn-A-P01-02".to_string(), make_sat(5, 10, 1.0, vec![]));
        let epoch = first_common_epoch(&data).unwrap();
        assert_eq!(epoch, Utc.timestamp_opt(5, 0).unwrap());
    }

    #[test]
    fn disjoint_grids_have_no_common_epoch() {
        let mut data = PropagationData::new();
        data.insert("rsn-A-P01-01".to_string(), make_sat(0, 5, 0.0, vec![]));
        data.insert("rsn-A-P01-02".to_string(), make_sat(100, 5, 1.0, vec![]));
        assert!(matches!(
            first_common_epoch(&data),
            Err(AnalyzerError::NoCommonEpoch)
        ));
    }

    #[test]
    fn neighbor_table_covers_every_satellite() {
        let resolver = MeshResolver::new(
            MeshPattern::ParallelOffset,
            ConstellationShape::new(3, 6).unwrap(),
        );
        let mut data = PropagationData::new();
        for plane in 1..=3u32 {
            for index in 1..=6u32 {
                data.insert(
                    format!("rsn-A-P{plane:02}-{index:02}"),
                    make_sat(0, 1, 0.0, vec![]),
                );
            }
        }
        let table = neighbor_table(&resolver, &data).unwrap();
        assert_eq!(table.pattern, "Flat X");
        assert_eq!(table.neighbors.len(), 18);
        assert!(table.neighbors.values().all(|n| n.len() == 4));
    }

    #[test]
    fn contact_report_counts_windows_and_states() {
        let window = ContactWindow {
            counterpart: "rsn-A-P01-02".to_string(),
            start: Utc.timestamp_opt(2, 0).unwrap(),
            end: Utc.timestamp_opt(4, 0).unwrap(),
            contact_type: ContactType::InterSatellite,
        };
        let mut data = PropagationData::new();
        data.insert(
            "rsn-A-P01-01".to_string(),
            make_sat(0, 10, 0.0, vec![window]),
        );
        data.insert("rsn-A-P01-02".to_string(), make_sat(0, 10, 500.0, vec![]));

        let report = contact_report(&data).unwrap();
        let summaries = &report.satellites["rsn-A-P01-01"];
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].windows, 1);
        assert_eq!(summaries[0].states, 3);
        assert_eq!(summaries[0].min_deputy_distance_m, Some(500.0));
        // The counterpart itself had no windows.
        assert!(report.satellites["rsn-A-P01-02"].is_empty());
    }

    #[test]
    fn propagation_data_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propagation-data.json");
        let mut data = PropagationData::new();
        data.insert("rsn-A-P01-01".to_string(), make_sat(0, 3, 7.0, vec![]));
        write_artifact(&path, &data).unwrap();

        let loaded = load_propagation_data(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["rsn-A-P01-01"].orbit_state_list.len(), 3);
    }
}
