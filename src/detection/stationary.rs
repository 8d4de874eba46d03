// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Stationary detection over a bounded position history
//!
//! Each node keeps a time-ordered ring of samples stamped with its last-seen
//! time. A node is stationary when the displacement between the latest sample
//! and the most recent sample at least `time_threshold` older stays within
//! `distance_threshold`. Only flips of the flag produce events.

use std::collections::{HashMap, VecDeque};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{EventDetail, NodeEvent};
use crate::config::span;
use crate::geo::{GeoPoint, Haversine};
use crate::nodes::NodeState;

/// Default number of samples kept per node
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// One recorded position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub position: GeoPoint,
}

pub struct StationaryEngine {
    history: HashMap<String, VecDeque<LocationSample>>,
    stationary: HashMap<String, bool>,
    capacity: usize,
    time_threshold_secs: u64,
    distance_threshold_km: f64,
    geo: Haversine,
}

impl StationaryEngine {
    pub fn new(
        time_threshold_secs: u64,
        distance_threshold_km: f64,
        capacity: usize,
        geo: Haversine,
    ) -> Self {
        info!(
            "Stationary check configured: Time={}s, Distance={:.0}m",
            time_threshold_secs,
            distance_threshold_km * 1000.0
        );
        Self {
            history: HashMap::new(),
            stationary: HashMap::new(),
            capacity: capacity.max(2),
            time_threshold_secs,
            distance_threshold_km,
            geo,
        }
    }

    pub fn set_thresholds(&mut self, time_threshold_secs: u64, distance_threshold_km: f64) {
        if time_threshold_secs != self.time_threshold_secs {
            info!("Stationary time threshold set to {}s", time_threshold_secs);
            self.time_threshold_secs = time_threshold_secs;
        }
        if distance_threshold_km != self.distance_threshold_km {
            info!(
                "Stationary distance threshold set to {:.0}m",
                distance_threshold_km * 1000.0
            );
            self.distance_threshold_km = distance_threshold_km;
        }
    }

    pub fn set_geodesy(&mut self, geo: Haversine) {
        self.geo = geo;
    }

    /// Record the node's current position, stamped with its last-seen time
    ///
    /// Samples must move forward in time. A report at the same coordinates as
    /// a run of identical samples advances the run's tail instead of growing
    /// the ring, so a parked node holds two samples: arrival and latest.
    pub fn update_location(&mut self, node: &NodeState) {
        let Some(position) = node.position.filter(GeoPoint::is_valid) else {
            return;
        };
        let sample = LocationSample {
            timestamp: node.last_seen,
            position,
        };

        let history = self.history.entry(node.id.clone()).or_default();
        let Some(last) = history.back().copied() else {
            history.push_back(sample);
            return;
        };

        if sample.timestamp <= last.timestamp {
            return;
        }

        let len = history.len();
        let extends_run = last.position == position
            && len >= 2
            && history[len - 2].position == position;

        if extends_run {
            if let Some(tail) = history.back_mut() {
                tail.timestamp = sample.timestamp;
            }
        } else {
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(sample);
        }
    }

    /// Decide whether the node is stationary, emitting an event on a flip
    pub fn check_stationary(&mut self, node: &NodeState) -> (bool, Option<NodeEvent>) {
        let was_stationary = self.stationary.get(&node.id).copied().unwrap_or(false);

        let Some(history) = self.history.get(&node.id).filter(|h| h.len() >= 2) else {
            self.downgrade(&node.id, was_stationary);
            return (false, None);
        };
        let Some(latest) = history.back().copied() else {
            self.downgrade(&node.id, was_stationary);
            return (false, None);
        };

        let window = span(self.time_threshold_secs);
        let anchor = history
            .iter()
            .rev()
            .find(|s| latest.timestamp - s.timestamp >= window)
            .copied();

        let Some(anchor) = anchor else {
            debug!("History timespan too short for stationary check on {}", node.id);
            self.downgrade(&node.id, was_stationary);
            return (false, None);
        };

        let Some(moved_km) = self.geo.between(anchor.position, latest.position) else {
            warn!(
                "Invalid distance during stationary check for {}. Skipping check.",
                node.id
            );
            self.downgrade(&node.id, was_stationary);
            return (false, None);
        };

        let is_stationary = moved_km <= self.distance_threshold_km;
        let detail = match (was_stationary, is_stationary) {
            (false, true) => Some(EventDetail::StationaryStarted {
                threshold_secs: self.time_threshold_secs,
                moved_km,
            }),
            (true, false) => Some(EventDetail::StationaryEnded {
                moved_km,
                span_secs: (latest.timestamp - anchor.timestamp).num_seconds(),
            }),
            _ => None,
        };
        self.stationary.insert(node.id.clone(), is_stationary);

        let event = detail.map(|detail| {
            let event = NodeEvent {
                node_id: node.id.clone(),
                node_name: node.display_name(),
                detail,
            };
            info!("{}", event);
            event
        });

        (is_stationary, event)
    }

    /// Ids of nodes currently flagged stationary, sorted
    pub fn stationary_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .stationary
            .iter()
            .filter(|(_, still)| **still)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_stationary(&self, node_id: &str) -> bool {
        self.stationary.get(node_id).copied().unwrap_or(false)
    }

    pub fn history(&self, node_id: &str) -> Option<&VecDeque<LocationSample>> {
        self.history.get(node_id)
    }

    /// Remove history and flag for nodes whose newest sample is too old
    pub fn cleanup_stale(&mut self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .history
            .iter()
            .filter_map(|(id, history)| {
                let newest = history.back()?;
                (now - newest.timestamp > max_age).then(|| id.clone())
            })
            .collect();

        if !stale.is_empty() {
            info!("Cleaning up stale stationary data for nodes: {:?}", stale);
            for id in &stale {
                self.history.remove(id);
                self.stationary.remove(id);
            }
        }
        stale
    }

    // Lose the stationary flag without announcing movement
    fn downgrade(&mut self, node_id: &str, was_stationary: bool) {
        if was_stationary {
            self.stationary.insert(node_id.to_string(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::EventKind;

    const ID: &str = "!a1b2c3d4";

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn report(secs: i64, lat: f64, lon: f64) -> NodeState {
        NodeState::new(ID, t(secs)).with_position(GeoPoint::new(lat, lon))
    }

    fn engine() -> StationaryEngine {
        StationaryEngine::new(300, 0.05, DEFAULT_HISTORY_CAPACITY, Haversine::default())
    }

    fn step(engine: &mut StationaryEngine, node: &NodeState) -> (bool, Option<NodeEvent>) {
        engine.update_location(node);
        engine.check_stationary(node)
    }

    #[test]
    fn test_append_rules() {
        let mut engine = engine();
        engine.update_location(&report(0, 43.0, -79.0));
        // Same timestamp, older timestamp: ignored
        engine.update_location(&report(0, 43.1, -79.0));
        engine.update_location(&report(-5, 43.1, -79.0));
        assert_eq!(engine.history(ID).unwrap().len(), 1);

        engine.update_location(&report(10, 43.001, -79.0));
        engine.update_location(&report(20, 43.001, -79.0));
        engine.update_location(&report(30, 43.001, -79.0));
        engine.update_location(&report(40, 43.001, -79.0));

        let history = engine.history(ID).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.back().unwrap().timestamp, t(40));
        assert!(history
            .iter()
            .zip(history.iter().skip(1))
            .all(|(a, b)| a.timestamp < b.timestamp));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut engine = StationaryEngine::new(300, 0.05, 5, Haversine::default());
        for i in 0..20 {
            engine.update_location(&report(i * 10, 43.0 + i as f64 * 0.001, -79.0));
        }
        let history = engine.history(ID).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.front().unwrap().timestamp, t(150));
    }

    #[test]
    fn test_no_position_no_sample() {
        let mut engine = engine();
        engine.update_location(&NodeState::new(ID, t(0)));
        assert!(engine.history(ID).is_none());
        assert_eq!(engine.check_stationary(&NodeState::new(ID, t(0))), (false, None));
    }

    #[test]
    fn test_short_span_never_stationary() {
        let mut engine = engine();
        for secs in (0..300).step_by(10) {
            let (still, event) = step(&mut engine, &report(secs, 43.0, -79.0));
            assert!(!still, "stationary at {secs}s");
            assert!(event.is_none());
        }
    }

    #[test]
    fn test_parked_node_flips_once() {
        let mut engine = engine();
        let mut started = Vec::new();
        for secs in (0..=400).step_by(10) {
            let (still, event) = step(&mut engine, &report(secs, 43.0, -79.0));
            assert_eq!(still, secs >= 300, "at {secs}s");
            if let Some(event) = event {
                assert_eq!(event.kind(), EventKind::StationaryStarted);
                started.push(secs);
            }
        }
        assert_eq!(started, vec![300]);
        assert_eq!(engine.stationary_nodes(), vec![ID.to_string()]);
    }

    #[test]
    fn test_small_jitter_counts_as_stationary() {
        let mut engine = engine();
        let mut events = 0;
        for (i, secs) in (0..=320).step_by(20).enumerate() {
            // ~11m of alternating jitter
            let lat = if i % 2 == 0 { 43.0 } else { 43.0001 };
            if step(&mut engine, &report(secs, lat, -79.0)).1.is_some() {
                events += 1;
            }
        }
        assert!(engine.is_stationary(ID));
        assert_eq!(events, 1);
    }

    #[test]
    fn test_moving_again() {
        let mut engine = engine();
        for secs in (0..=300).step_by(30) {
            step(&mut engine, &report(secs, 43.0, -79.0));
        }
        assert!(engine.is_stationary(ID));

        let (still, event) = step(&mut engine, &report(330, 43.01, -79.0));
        assert!(!still);
        let event = event.unwrap();
        assert_eq!(event.kind(), EventKind::StationaryEnded);
        assert!(event.to_string().contains("is moving again"));

        // Unchanged flag: no repeat
        let (_, again) = step(&mut engine, &report(360, 43.02, -79.0));
        assert!(again.is_none());
    }

    #[test]
    fn test_silent_downgrade_when_window_shrinks() {
        let mut engine = engine();
        for secs in (0..=300).step_by(30) {
            step(&mut engine, &report(secs, 43.0, -79.0));
        }
        assert!(engine.is_stationary(ID));

        // A wider window no longer covered by history clears the flag quietly
        engine.set_thresholds(3600, 0.05);
        let (still, event) = engine.check_stationary(&report(300, 43.0, -79.0));
        assert!(!still);
        assert!(event.is_none());
        assert!(engine.stationary_nodes().is_empty());
    }

    #[test]
    fn test_huge_window_never_stationary() {
        let mut engine = StationaryEngine::new(u64::MAX, 0.05, DEFAULT_HISTORY_CAPACITY, Haversine::default());
        for secs in (0..=400).step_by(10) {
            let (still, event) = step(&mut engine, &report(secs, 43.0, -79.0));
            assert!(!still);
            assert!(event.is_none());
        }
    }

    #[test]
    fn test_cleanup_stale() {
        let mut engine = engine();
        engine.update_location(&report(0, 43.0, -79.0));
        engine.update_location(&NodeState::new("!fresh", t(7000)).with_position(GeoPoint::new(1.0, 1.0)));

        let removed = engine.cleanup_stale(Duration::seconds(3600), t(7200));
        assert_eq!(removed, vec![ID.to_string()]);
        assert!(engine.history(ID).is_none());
        assert!(engine.history("!fresh").is_some());
    }
}
