// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Node table - the live view of every peer heard on the mesh

mod local;

pub use local::{run_position_worker, PositionSource};

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geo::GeoPoint;

/// Known attributes of one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    pub name: Option<String>,
    pub position: Option<GeoPoint>,
    /// Meters above sea level
    pub altitude: Option<i32>,
    pub last_seen: DateTime<Utc>,
}

impl NodeState {
    pub fn new(id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: None,
            position: None,
            altitude: None,
            last_seen,
        }
    }

    pub fn with_position(mut self, position: GeoPoint) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reported name, or `Node <last four id chars>`
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                let tail: String = {
                    let mut chars: Vec<char> = self.id.chars().rev().take(4).collect();
                    chars.reverse();
                    chars.into_iter().collect()
                };
                format!("Node {}", tail)
            }
        }
    }
}

/// Concurrency-safe table of node id -> state
///
/// Cloning the store clones the handle, not the table. Every method holds the
/// lock for a single short critical section.
#[derive(Clone, Default)]
pub struct NodeStore {
    nodes: Arc<RwLock<HashMap<String, NodeState>>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position report, creating the node on first sighting
    pub fn upsert_position(
        &self,
        id: &str,
        position: Option<GeoPoint>,
        altitude: Option<i32>,
        seen: DateTime<Utc>,
    ) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeState::new(id, seen));
        node.position = position;
        node.altitude = altitude;
        node.last_seen = seen;
    }

    /// Record user-info or telemetry traffic from a node
    pub fn touch(&self, id: &str, name: Option<&str>, seen: DateTime<Utc>) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeState::new(id, seen));
        if let Some(name) = name {
            node.name = Some(name.to_string());
        }
        node.last_seen = seen;
    }

    /// Position report from the local GPS for our own entry
    pub fn set_local_position(
        &self,
        id: &str,
        position: GeoPoint,
        altitude: Option<i32>,
        now: DateTime<Utc>,
    ) {
        self.upsert_position(id, Some(position), altitude, now);
    }

    /// Forget the position of a node that stopped reporting one
    pub fn clear_position(&self, id: &str, seen: DateTime<Utc>) {
        self.upsert_position(id, None, None, seen);
    }

    pub fn get(&self, id: &str) -> Option<NodeState> {
        self.nodes.read().get(id).cloned()
    }

    /// Copy of every node except `exclude`, ordered by id
    pub fn snapshot_excluding(&self, exclude: Option<&str>) -> Vec<NodeState> {
        let mut snapshot: Vec<NodeState> = {
            let nodes = self.nodes.read();
            nodes
                .values()
                .filter(|n| Some(n.id.as_str()) != exclude)
                .cloned()
                .collect()
        };
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Drop nodes unseen for longer than `max_age`, returning their ids
    pub fn prune_unseen(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let mut nodes = self.nodes.write();
        let stale: Vec<String> = nodes
            .values()
            .filter(|n| now - n.last_seen > max_age)
            .map(|n| n.id.clone())
            .collect();
        for id in &stale {
            nodes.remove(id);
        }
        if !stale.is_empty() {
            info!("Pruned {} unseen node(s): {:?}", stale.len(), stale);
        } else {
            debug!("No unseen nodes to prune");
        }
        stale
    }
}
