// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Geofence membership tracking
//!
//! Membership is recomputed from scratch on every check and diffed against
//! the previous set; events are a by-product of that diff. Nodes inside no
//! fence have no map entry at all.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

use super::{EventDetail, ExitReason, NodeEvent};
use crate::config::GeofenceDefinition;
use crate::geo::Haversine;
use crate::nodes::NodeState;

pub struct GeofenceEngine {
    fences: Vec<GeofenceDefinition>,
    // node id -> names of fences it was inside at the last check
    inside: HashMap<String, BTreeSet<String>>,
    geo: Haversine,
}

impl GeofenceEngine {
    pub fn new(fences: Vec<GeofenceDefinition>, geo: Haversine) -> Self {
        info!("Geofence engine initialized with {} geofences", fences.len());
        Self {
            fences,
            inside: HashMap::new(),
            geo,
        }
    }

    pub fn set_geodesy(&mut self, geo: Haversine) {
        self.geo = geo;
    }

    /// Evaluate one node against every fence and return Enter/Exit events
    pub fn check(&mut self, node: &NodeState) -> Vec<NodeEvent> {
        let node_name = node.display_name();

        let Some(position) = node.position else {
            // Position lost: everything it was inside becomes an exit
            let Some(previous) = self.inside.remove(&node.id) else {
                return Vec::new();
            };
            return previous
                .into_iter()
                .map(|fence| {
                    let radius_km = self.radius_of(&fence).unwrap_or(0.0);
                    let event = NodeEvent {
                        node_id: node.id.clone(),
                        node_name: node_name.clone(),
                        detail: EventDetail::Exited {
                            fence,
                            radius_km,
                            distance_km: None,
                            reason: ExitReason::PositionUnknown,
                        },
                    };
                    info!("{}", event);
                    event
                })
                .collect();
        };

        let previous = self.inside.remove(&node.id).unwrap_or_default();
        let mut current = BTreeSet::new();
        let mut events = Vec::new();

        for fence in &self.fences {
            let Some(distance) = self.geo.between(position, fence.center()) else {
                warn!(
                    "Invalid distance for node {} to fence '{}'. Skipping check.",
                    node.id, fence.name
                );
                continue;
            };

            if distance <= fence.radius_km {
                current.insert(fence.name.clone());
                if !previous.contains(&fence.name) {
                    let event = NodeEvent {
                        node_id: node.id.clone(),
                        node_name: node_name.clone(),
                        detail: EventDetail::Entered {
                            fence: fence.name.clone(),
                            radius_km: fence.radius_km,
                            distance_km: distance,
                        },
                    };
                    info!("{}", event);
                    events.push(event);
                }
            }
        }

        for fence_name in previous.difference(&current) {
            let Some(fence) = self.fences.iter().find(|f| &f.name == fence_name) else {
                warn!(
                    "Node {} exited unknown fence '{}' - state inconsistency?",
                    node.id, fence_name
                );
                continue;
            };
            let event = NodeEvent {
                node_id: node.id.clone(),
                node_name: node_name.clone(),
                detail: EventDetail::Exited {
                    fence: fence_name.clone(),
                    radius_km: fence.radius_km,
                    distance_km: self.geo.between(position, fence.center()),
                    reason: ExitReason::OutsideRadius,
                },
            };
            info!("{}", event);
            events.push(event);
        }

        if !current.is_empty() {
            self.inside.insert(node.id.clone(), current);
        }

        events
    }

    /// fence name -> ids of nodes inside it; every configured fence appears
    pub fn summary(&self) -> BTreeMap<String, Vec<String>> {
        let mut summary: BTreeMap<String, Vec<String>> = self
            .fences
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();

        for (node_id, fences) in &self.inside {
            for fence in fences {
                if let Some(nodes) = summary.get_mut(fence) {
                    nodes.push(node_id.clone());
                }
            }
        }
        for nodes in summary.values_mut() {
            nodes.sort();
        }
        summary
    }

    /// Replace the fence list; all membership is dropped without exit events
    pub fn reload(&mut self, fences: Vec<GeofenceDefinition>) {
        self.fences = fences;
        self.inside.clear();
        info!(
            "Reloaded {} geofences. Resetting geofence membership.",
            self.fences.len()
        );
    }

    /// Fences the node was inside at its last check
    pub fn membership(&self, node_id: &str) -> Option<&BTreeSet<String>> {
        self.inside.get(node_id)
    }

    /// Nodes currently holding membership state
    pub fn tracked_nodes(&self) -> usize {
        self.inside.len()
    }

    /// Drop membership for nodes removed from the node table
    pub fn forget(&mut self, node_ids: &[String]) {
        for id in node_ids {
            self.inside.remove(id);
        }
    }

    fn radius_of(&self, fence_name: &str) -> Option<f64> {
        self.fences
            .iter()
            .find(|f| f.name == fence_name)
            .map(|f| f.radius_km)
    }
}
