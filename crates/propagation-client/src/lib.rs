//! Propagation Client
//!
//! Request/response model for the external flight dynamics service, the
//! batch splitter that keeps each propagation call bounded, and the merge
//! of partial results back into one per-satellite map.
//!
//! Large scenarios are not propagated in one call: assets are cut into
//! batches of at most [`MAX_BATCH_SIZE`] satellites. Each batch is then
//! extended with the satellites referenced by its members' space contacts
//! so the service can compute contact geometry against them, flagged
//! `propagate = false` so they are not propagated twice.

use constellation_core::{ContactWindow, Trajectory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

pub mod dispatch;

pub use dispatch::{
    BatchFailure, DispatchConfig, HttpTransport, PropagationOutcome, PropagationTransport,
    TransportError,
};

/// Largest number of propagating satellites per service call.
pub const MAX_BATCH_SIZE: usize = 20;

/// Propagation endpoint of the flight dynamics service.
pub const PROPAGATION_ENDPOINT: &str = "/api/v1/propagation-data";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid batch size {0}, must be positive")]
    InvalidBatchSize(usize),
    #[error("satellite {satellite} references unknown space contact '{reference}'")]
    UnknownSpaceContact { satellite: String, reference: String },
    #[error(
        "batch {batch_index}: returned satellites do not match request, \
         missing {missing:?}, unexpected {unexpected:?}"
    )]
    DataMismatch {
        batch_index: usize,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("satellite {id} was propagated by more than one batch")]
    MergeConflict { id: String },
    #[error("batch count mismatch: {batches} batches but {results} results")]
    BatchCountMismatch { batches: usize, results: usize },
    #[error("{failed} of {total} propagation batches failed")]
    BatchesFailed {
        failed: usize,
        total: usize,
        failures: Vec<BatchFailure>,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Scenario-level fields shared by every sub-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMeta {
    pub id: String,
    /// Simulation window bounds, UTC epoch milliseconds.
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    /// Sampling cadence of the propagated states [ms].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic_update: Option<i64>,
    pub propagator: PropagatorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatorSpec {
    #[serde(rename = "type")]
    pub kind: String,
}

/// One asset of the propagation scenario.
///
/// The orbit definition is passed through opaquely; its shape (TLE,
/// Keplerian, state vector) is the service's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    pub archetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drag_coefficient: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_coefficient: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ground_contacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub space_contacts: Vec<String>,
    /// False for satellites included only as contact counterparts.
    #[serde(default = "default_true")]
    pub propagate: bool,
}

fn default_true() -> bool {
    true
}

/// A ground station or user terminal location of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// A propagation request, either the full scenario or one batch of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationRequest {
    pub scenario: ScenarioMeta,
    pub assets: Vec<AssetDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points_of_interest: Vec<PointOfInterest>,
}

impl PropagationRequest {
    /// Ids of the assets this request asks the service to propagate.
    pub fn propagating_ids(&self) -> Vec<&str> {
        self.assets
            .iter()
            .filter(|a| a.propagate)
            .map(|a| a.id.as_str())
            .collect()
    }
}

/// Per-satellite output of the propagation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteData {
    pub orbit_state_list: Trajectory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact_list: Vec<ContactWindow>,
}

/// Propagation results keyed by satellite id.
pub type PropagationData = BTreeMap<String, SatelliteData>;

/// Cut the request into sub-requests of at most `max_batch_size`
/// propagating assets each; scenario fields and points of interest ride
/// along unchanged. Every batch is extended with the space-contact
/// counterparts its members reference but the batch does not contain,
/// flagged as non-propagating.
pub fn split_into_batches(
    request: &PropagationRequest,
    max_batch_size: usize,
) -> Result<Vec<PropagationRequest>> {
    if max_batch_size == 0 {
        return Err(ClientError::InvalidBatchSize(max_batch_size));
    }

    let by_id: HashMap<&str, &AssetDescriptor> = request
        .assets
        .iter()
        .map(|a| (a.id.as_str(), a))
        .collect();
    for asset in &request.assets {
        for reference in &asset.space_contacts {
            if !by_id.contains_key(reference.as_str()) {
                return Err(ClientError::UnknownSpaceContact {
                    satellite: asset.id.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }

    let mut batches = Vec::new();
    for chunk in request.assets.chunks(max_batch_size) {
        let mut assets: Vec<AssetDescriptor> = chunk.to_vec();
        let mut in_batch: HashSet<&str> = chunk.iter().map(|a| a.id.as_str()).collect();
        for asset in chunk {
            for reference in &asset.space_contacts {
                if in_batch.contains(reference.as_str()) {
                    continue;
                }
                let mut passive = by_id[reference.as_str()].clone();
                passive.propagate = false;
                assets.push(passive);
                in_batch.insert(reference.as_str());
            }
        }
        batches.push(PropagationRequest {
            scenario: request.scenario.clone(),
            assets,
            points_of_interest: request.points_of_interest.clone(),
        });
    }
    debug!(
        assets = request.assets.len(),
        batches = batches.len(),
        max_batch_size,
        "split propagation request"
    );
    Ok(batches)
}

/// Union the per-batch results back into one map keyed by satellite id.
///
/// Each batch's returned ids must match its propagating ids exactly, up to
/// passive counterparts some services echo back; those are deduplicated,
/// the propagated result always winning. A satellite propagated by two
/// batches is a merge conflict.
pub fn merge_results(
    batches: &[PropagationRequest],
    results: &[PropagationData],
) -> Result<PropagationData> {
    if batches.len() != results.len() {
        return Err(ClientError::BatchCountMismatch {
            batches: batches.len(),
            results: results.len(),
        });
    }
    merge_indexed(
        batches
            .iter()
            .zip(results.iter())
            .enumerate()
            .map(|(index, (batch, result))| (index, batch, result)),
    )
}

/// Merge over an explicit (index, batch, result) iterator; the dispatch
/// layer uses this to merge only the batches that survived, keeping their
/// original indices in any error.
pub(crate) fn merge_indexed<'a>(
    pairs: impl IntoIterator<Item = (usize, &'a PropagationRequest, &'a PropagationData)>,
) -> Result<PropagationData> {
    let mut merged = PropagationData::new();
    let mut passive_pool = PropagationData::new();

    for (batch_index, batch, result) in pairs {
        validate_batch_result(batch_index, batch, result)?;
        let propagating: HashSet<&str> = batch.propagating_ids().into_iter().collect();
        for (id, data) in result {
            if propagating.contains(id.as_str()) {
                if merged.contains_key(id) {
                    return Err(ClientError::MergeConflict { id: id.clone() });
                }
                merged.insert(id.clone(), data.clone());
            } else {
                passive_pool.insert(id.clone(), data.clone());
            }
        }
    }

    for (id, data) in passive_pool {
        merged.entry(id).or_insert(data);
    }
    Ok(merged)
}

/// The service must cover every propagating satellite of the batch and may
/// only add entries for the batch's passive counterparts.
pub fn validate_batch_result(
    batch_index: usize,
    batch: &PropagationRequest,
    result: &PropagationData,
) -> Result<()> {
    let propagating: HashSet<&str> = batch.propagating_ids().into_iter().collect();
    let known: HashSet<&str> = batch.assets.iter().map(|a| a.id.as_str()).collect();

    let missing: Vec<String> = propagating
        .iter()
        .filter(|id| !result.contains_key(**id))
        .map(|id| id.to_string())
        .collect();
    let unexpected: Vec<String> = result
        .keys()
        .filter(|id| !known.contains(id.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        let mut missing = missing;
        missing.sort();
        Err(ClientError::DataMismatch {
            batch_index,
            missing,
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_scenario() -> ScenarioMeta {
        ScenarioMeta {
            id: "perf-run".to_string(),
            start_timestamp: 1_700_000_000_000,
            end_timestamp: 1_700_003_600_000,
            periodic_update: Some(10_000),
            propagator: PropagatorSpec {
                kind: "numerical".to_string(),
            },
        }
    }

    pub(crate) fn make_asset(id: &str, space_contacts: &[&str]) -> AssetDescriptor {
        AssetDescriptor {
            id: id.to_string(),
            archetype: "satellite".to_string(),
            orbit: None,
            mass: Some(250.0),
            drag_coefficient: None,
            reflection_coefficient: None,
            ground_contacts: Vec::new(),
            space_contacts: space_contacts.iter().map(|s| s.to_string()).collect(),
            propagate: true,
        }
    }

    pub(crate) fn make_request(assets: Vec<AssetDescriptor>) -> PropagationRequest {
        PropagationRequest {
            scenario: make_scenario(),
            assets,
            points_of_interest: vec![PointOfInterest {
                id: "gs-munich".to_string(),
                latitude: 48.14,
                longitude: 11.60,
                altitude: 520.0,
            }],
        }
    }

    pub(crate) fn make_data(ids: &[&str]) -> PropagationData {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    SatelliteData {
                        orbit_state_list: Trajectory::new(Vec::new()).unwrap(),
                        contact_list: Vec::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn batch_sizes_sum_to_asset_count() {
        let assets: Vec<AssetDescriptor> = (0..47)
            .map(|i| make_asset(&format!("rsn-A-P{:02}-{:02}", i / 10 + 1, i % 10 + 1), &[]))
            .collect();
        let request = make_request(assets);
        let batches = split_into_batches(&request, MAX_BATCH_SIZE).unwrap();

        assert_eq!(batches.len(), 3);
        let total: usize = batches.iter().map(|b| b.assets.len()).sum();
        assert_eq!(total, 47);
        assert!(batches.iter().all(|b| b.assets.len() <= MAX_BATCH_SIZE));
        assert_eq!(batches[2].assets.len(), 7);
        // Scenario fields ride along unchanged.
        for batch in &batches {
            assert_eq!(batch.scenario.id, request.scenario.id);
            assert_eq!(batch.points_of_interest.len(), 1);
        }
    }

    #[test]
    fn passive_contacts_are_added_without_propagation() {
        // A references C which lands in the second batch.
        let request = make_request(vec![
            make_asset("sat-a", &["sat-c"]),
            make_asset("sat-b", &[]),
            make_asset("sat-c", &[]),
        ]);
        let batches = split_into_batches(&request, 2).unwrap();

        assert_eq!(batches.len(), 2);
        let first = &batches[0];
        assert_eq!(first.assets.len(), 3);
        let passive = first.assets.iter().find(|a| a.id == "sat-c").unwrap();
        assert!(!passive.propagate);
        assert_eq!(first.propagating_ids(), vec!["sat-a", "sat-b"]);
        // The batch already holding the counterpart is untouched.
        assert_eq!(batches[1].assets.len(), 1);
        assert!(batches[1].assets[0].propagate);
    }

    #[test]
    fn duplicate_passive_references_are_added_once() {
        let request = make_request(vec![
            make_asset("sat-a", &["sat-d"]),
            make_asset("sat-b", &["sat-d"]),
            make_asset("sat-c", &[]),
            make_asset("sat-d", &[]),
        ]);
        let batches = split_into_batches(&request, 3).unwrap();
        let first = &batches[0];
        let d_count = first.assets.iter().filter(|a| a.id == "sat-d").count();
        assert_eq!(d_count, 1);
    }

    #[test]
    fn unknown_space_contact_is_rejected() {
        let request = make_request(vec![make_asset("sat-a", &["sat-ghost"])]);
        let err = split_into_batches(&request, 10).unwrap_err();
        assert!(matches!(err, ClientError::UnknownSpaceContact { .. }));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let request = make_request(vec![make_asset("sat-a", &[])]);
        assert!(matches!(
            split_into_batches(&request, 0),
            Err(ClientError::InvalidBatchSize(0))
        ));
    }

    #[test]
    fn merge_reconstructs_exactly_the_propagating_ids() {
        let request = make_request(vec![
            make_asset("sat-a", &["sat-c"]),
            make_asset("sat-b", &[]),
            make_asset("sat-c", &[]),
            make_asset("sat-d", &[]),
        ]);
        let batches = split_into_batches(&request, 2).unwrap();
        let results: Vec<PropagationData> = batches
            .iter()
            .map(|b| {
                let ids: Vec<&str> = b.assets.iter().map(|a| a.id.as_str()).collect();
                make_data(&ids)
            })
            .collect();

        let merged = merge_results(&batches, &results).unwrap();
        let ids: Vec<&String> = merged.keys().collect();
        assert_eq!(ids, vec!["sat-a", "sat-b", "sat-c", "sat-d"]);
    }

    #[test]
    fn missing_propagated_satellite_is_a_data_mismatch() {
        let request = make_request(vec![make_asset("sat-a", &[]), make_asset("sat-b", &[])]);
        let batches = split_into_batches(&request, 10).unwrap();
        let results = vec![make_data(&["sat-a"])];
        let err = merge_results(&batches, &results).unwrap_err();
        match err {
            ClientError::DataMismatch {
                batch_index,
                missing,
                ..
            } => {
                assert_eq!(batch_index, 0);
                assert_eq!(missing, vec!["sat-b".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unexpected_satellite_is_a_data_mismatch() {
        let request = make_request(vec![make_asset("sat-a", &[])]);
        let batches = split_into_batches(&request, 10).unwrap();
        let results = vec![make_data(&["sat-a", "sat-z"])];
        let err = merge_results(&batches, &results).unwrap_err();
        assert!(matches!(err, ClientError::DataMismatch { .. }));
    }

    #[test]
    fn propagated_result_wins_over_passive_echo() {
        let request = make_request(vec![
            make_asset("sat-a", &["sat-b"]),
            make_asset("sat-b", &[]),
        ]);
        // Batch size 1: batch 0 = [a, passive b], batch 1 = [b].
        let batches = split_into_batches(&request, 1).unwrap();
        let mut echo = make_data(&["sat-a", "sat-b"]);
        // Mark the passive echo so we can tell which copy survived.
        echo.get_mut("sat-b").unwrap().contact_list = vec![];
        let real = {
            let mut d = make_data(&["sat-b"]);
            d.get_mut("sat-b").unwrap().contact_list = vec![ContactWindow {
                counterpart: "sat-a".to_string(),
                start: chrono::DateTime::from_timestamp(0, 0).unwrap(),
                end: chrono::DateTime::from_timestamp(60, 0).unwrap(),
                contact_type: constellation_core::ContactType::InterSatellite,
            }];
            d
        };
        let merged = merge_results(&batches, &[echo, real]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["sat-b"].contact_list.len(), 1);
    }

    #[test]
    fn double_propagation_is_a_merge_conflict() {
        let request = make_request(vec![make_asset("sat-a", &[])]);
        let batch = split_into_batches(&request, 10).unwrap().remove(0);
        let batches = vec![batch.clone(), batch];
        let results = vec![make_data(&["sat-a"]), make_data(&["sat-a"])];
        let err = merge_results(&batches, &results).unwrap_err();
        assert!(matches!(err, ClientError::MergeConflict { id } if id == "sat-a"));
    }

    #[test]
    fn batch_count_mismatch_is_rejected() {
        let request = make_request(vec![make_asset("sat-a", &[])]);
        let batches = split_into_batches(&request, 10).unwrap();
        let err = merge_results(&batches, &[]).unwrap_err();
        assert!(matches!(err, ClientError::BatchCountMismatch { .. }));
    }
}
