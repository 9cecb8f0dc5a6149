//! Contact-Window State Extractor
//!
//! Slices a satellite's propagated trajectory into the sub-sequences that
//! fall inside its contact windows, one sequence per counterpart. The
//! result is what the air/space link budget collaborators consume: for each
//! visibility window, the chief satellite's states during that window, and
//! for inter-satellite contacts the distance to every co-visible deputy
//! satellite at the same epoch.

use chrono::{DateTime, Utc};
use constellation_core::{distance_m, ContactType, ContactWindow, StateSample, Trajectory};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("malformed contact window for '{counterpart}': end {end} precedes start {start}")]
    MalformedWindow {
        counterpart: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// One selected state, with the side-channel deputy distances for
/// inter-satellite windows.
#[derive(Debug, Clone, Serialize)]
pub struct ContactState {
    #[serde(flatten)]
    pub sample: StateSample,
    /// Distance [m] to each referenced deputy satellite whose trajectory
    /// has a sample at exactly this epoch. Deputies without a matching
    /// sample are simply absent.
    #[serde(rename = "distances", skip_serializing_if = "BTreeMap::is_empty")]
    pub deputy_distances_m: BTreeMap<String, f64>,
}

/// States of `trajectory` inside each counterpart's contact windows.
///
/// Every counterpart that owns at least one window gets an entry, empty
/// when no sample falls inside its windows. Window bounds are inclusive on
/// both sides. Windows of different counterparts may overlap; the same
/// sample is then selected independently for each.
///
/// `deputy_trajectories` supplies the trajectories of inter-satellite
/// counterparts for the distance side channel; entries are looked up by
/// counterpart id and may be missing.
pub fn extract_states(
    trajectory: &Trajectory,
    windows: &[ContactWindow],
    deputy_trajectories: &HashMap<String, Trajectory>,
) -> Result<HashMap<String, Vec<ContactState>>> {
    for window in windows {
        if !window.is_well_formed() {
            return Err(ExtractError::MalformedWindow {
                counterpart: window.counterpart.clone(),
                start: window.start,
                end: window.end,
            });
        }
    }

    // Group windows per counterpart, sorted by start. Windows of one
    // counterpart never overlap, which lets a single forward cursor walk
    // the trajectory once per counterpart.
    let mut by_counterpart: BTreeMap<&str, Vec<&ContactWindow>> = BTreeMap::new();
    for window in windows {
        by_counterpart
            .entry(window.counterpart.as_str())
            .or_default()
            .push(window);
    }
    for group in by_counterpart.values_mut() {
        group.sort_by_key(|w| w.start_ms());
    }

    // Deputies referenced by any inter-satellite window.
    let deputy_ids: Vec<&str> = by_counterpart
        .iter()
        .filter(|(_, group)| {
            group
                .iter()
                .any(|w| w.contact_type == ContactType::InterSatellite)
        })
        .map(|(id, _)| *id)
        .collect();

    let samples = trajectory.samples();
    let mut extracted: HashMap<String, Vec<ContactState>> = HashMap::new();

    for (counterpart, group) in &by_counterpart {
        let mut states = Vec::new();
        let mut cursor = 0usize;
        for window in group {
            while cursor < samples.len() && samples[cursor].epoch_ms() < window.start_ms() {
                cursor += 1;
            }
            while cursor < samples.len() && samples[cursor].epoch_ms() <= window.end_ms() {
                let sample = samples[cursor];
                let deputy_distances_m =
                    if window.contact_type == ContactType::InterSatellite {
                        deputy_distances(&sample, &deputy_ids, deputy_trajectories)
                    } else {
                        BTreeMap::new()
                    };
                states.push(ContactState {
                    sample,
                    deputy_distances_m,
                });
                cursor += 1;
            }
        }
        debug!(
            counterpart,
            windows = group.len(),
            states = states.len(),
            "extracted contact states"
        );
        extracted.insert((*counterpart).to_string(), states);
    }

    Ok(extracted)
}

/// Distance to every deputy with a sample at exactly the chief's epoch.
fn deputy_distances(
    sample: &StateSample,
    deputy_ids: &[&str],
    deputy_trajectories: &HashMap<String, Trajectory>,
) -> BTreeMap<String, f64> {
    let chief_pos = sample.position_m();
    let mut distances = BTreeMap::new();
    for deputy_id in deputy_ids {
        let Some(deputy) = deputy_trajectories.get(*deputy_id) else {
            continue;
        };
        if let Some(state) = deputy.sample_at(sample.epoch_ms()) {
            distances.insert(
                (*deputy_id).to_string(),
                distance_m(&chief_pos, &state.position_m()),
            );
        }
    }
    distances
}
