//! Contact-window link gating.
//!
//! The static mesh assumes every topology link is usable. In flight, an
//! inter-satellite link only exists while the two satellites are inside an
//! active ISV contact window; [`ContactGate`] turns the propagated contact
//! lists into the reachability predicate the router injects.

use chrono::{DateTime, Utc};
use constellation_core::{ContactType, ContactWindow, SatelliteId};
use std::collections::HashMap;

/// Reachability predicate backed by inter-satellite contact windows at a
/// fixed epoch.
#[derive(Debug, Clone)]
pub struct ContactGate {
    isv_windows: HashMap<String, Vec<ContactWindow>>,
    epoch_ms: i64,
}

impl ContactGate {
    /// Build the gate from per-satellite contact lists (any contact type;
    /// only inter-satellite windows are retained).
    pub fn new(contacts: &HashMap<String, Vec<ContactWindow>>, epoch: DateTime<Utc>) -> Self {
        let mut isv_windows: HashMap<String, Vec<ContactWindow>> = HashMap::new();
        for (sat_id, windows) in contacts {
            let isv: Vec<ContactWindow> = windows
                .iter()
                .filter(|w| w.contact_type == ContactType::InterSatellite)
                .cloned()
                .collect();
            if !isv.is_empty() {
                isv_windows.insert(sat_id.clone(), isv);
            }
        }
        Self {
            isv_windows,
            epoch_ms: epoch.timestamp_millis(),
        }
    }

    /// True when `from` holds an ISV window with `to` that covers the
    /// gate's epoch.
    pub fn reachable(&self, from: &SatelliteId, to: &SatelliteId) -> bool {
        let to_id = to.to_string();
        self.isv_windows
            .get(&from.to_string())
            .map(|windows| {
                windows
                    .iter()
                    .any(|w| w.counterpart == to_id && w.contains_ms(self.epoch_ms))
            })
            .unwrap_or(false)
    }

    /// Closure form for [`Router::route_gated`](crate::Router::route_gated).
    pub fn predicate(&self) -> impl Fn(&SatelliteId, &SatelliteId) -> bool + '_ {
        |from, to| self.reachable(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_window(counterpart: &str, start_s: i64, end_s: i64, ct: ContactType) -> ContactWindow {
        ContactWindow {
            counterpart: counterpart.to_string(),
            start: Utc.timestamp_opt(start_s, 0).unwrap(),
            end: Utc.timestamp_opt(end_s, 0).unwrap(),
            contact_type: ct,
        }
    }

    fn sat(plane: u32, index: u32) -> SatelliteId {
        SatelliteId::new("rsn", "A", plane, index).unwrap()
    }

    #[test]
    fn active_isv_window_opens_the_link() {
        let a = sat(1, 1);
        let b = sat(1, 2);
        let mut contacts = HashMap::new();
        contacts.insert(
            a.to_string(),
            vec![make_window(&b.to_string(), 100, 200, ContactType::InterSatellite)],
        );

        let inside = ContactGate::new(&contacts, Utc.timestamp_opt(150, 0).unwrap());
        assert!(inside.reachable(&a, &b));
        // Directional: b carries no window back to a.
        assert!(!inside.reachable(&b, &a));

        let outside = ContactGate::new(&contacts, Utc.timestamp_opt(300, 0).unwrap());
        assert!(!outside.reachable(&a, &b));
    }

    #[test]
    fn ground_windows_never_gate_isl_links() {
        let a = sat(1, 1);
        let b = sat(1, 2);
        let mut contacts = HashMap::new();
        contacts.insert(
            a.to_string(),
            vec![make_window(&b.to_string(), 100, 200, ContactType::GroundOrUser)],
        );
        let gate = ContactGate::new(&contacts, Utc.timestamp_opt(150, 0).unwrap());
        assert!(!gate.reachable(&a, &b));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let a = sat(1, 1);
        let b = sat(2, 1);
        let mut contacts = HashMap::new();
        contacts.insert(
            a.to_string(),
            vec![make_window(&b.to_string(), 100, 200, ContactType::InterSatellite)],
        );
        for epoch_s in [100, 200] {
            let gate = ContactGate::new(&contacts, Utc.timestamp_opt(epoch_s, 0).unwrap());
            assert!(gate.reachable(&a, &b));
        }
    }
}
