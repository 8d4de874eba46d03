// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Mesh simulator for demo/testing
//!
//! Stands in for the radio: a handful of peers around an anchor point, some
//! wandering, some parked, some that lose their fix now and then. Also
//! provides a jittery GPS for the local node.

use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand_distr::Normal;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::Shutdown;
use crate::geo::GeoPoint;
use crate::nodes::{NodeStore, PositionSource};

/// Anchor used when no geofence is configured
pub const DEFAULT_ANCHOR: GeoPoint = GeoPoint {
    latitude: 43.6532,
    longitude: -79.3832,
};

/// Local node id used in demo mode when none is configured
pub const DEMO_LOCAL_ID: &str = "!5eed0001";

// ~1e-3 degrees of latitude is ~110 m
const WALK_STEP_DEG: f64 = 0.0015;
const GPS_NOISE_DEG: f64 = 0.00002;
const SPREAD_DEG: f64 = 0.01;

const PEER_NAMES: [&str; 6] = ["Rover", "Hiker", "Base Camp", "Kayak", "Scout", "Relay"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Wander,
    Parked,
    Flaky,
}

struct SimPeer {
    id: String,
    name: &'static str,
    position: GeoPoint,
    behavior: Behavior,
    has_fix: bool,
}

/// Where the demo mesh is centred: the first fence, or a default point
pub fn demo_anchor(config: &Config) -> GeoPoint {
    config
        .geofences
        .first()
        .map(|f| f.center())
        .unwrap_or(DEFAULT_ANCHOR)
}

/// Writes simulated peer traffic into a [`NodeStore`]
pub struct MeshSimulator {
    store: NodeStore,
    peers: Vec<SimPeer>,
    rng: StdRng,
    walk: Normal<f64>,
    drop_probability: f64,
    recover_probability: f64,
}

impl MeshSimulator {
    pub fn new(store: NodeStore, anchor: GeoPoint, peer_count: usize) -> Result<Self> {
        Self::with_rng(store, anchor, peer_count, StdRng::from_entropy())
    }

    /// Deterministic variant for tests
    pub fn seeded(store: NodeStore, anchor: GeoPoint, peer_count: usize, seed: u64) -> Result<Self> {
        Self::with_rng(store, anchor, peer_count, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: NodeStore, anchor: GeoPoint, peer_count: usize, mut rng: StdRng) -> Result<Self> {
        let walk = Normal::new(0.0, WALK_STEP_DEG)?;

        let peers = (0..peer_count)
            .map(|i| {
                let behavior = match i % 3 {
                    0 => Behavior::Wander,
                    1 => Behavior::Parked,
                    _ => Behavior::Flaky,
                };
                let position = GeoPoint::new(
                    anchor.latitude + rng.gen_range(-SPREAD_DEG..SPREAD_DEG),
                    anchor.longitude + rng.gen_range(-SPREAD_DEG..SPREAD_DEG),
                );
                SimPeer {
                    id: format!("!{:08x}", rng.gen::<u32>()),
                    name: PEER_NAMES[i % PEER_NAMES.len()],
                    position,
                    behavior,
                    has_fix: true,
                }
            })
            .collect();

        Ok(Self {
            store,
            peers,
            rng,
            walk,
            drop_probability: 0.1,
            recover_probability: 0.4,
        })
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }

    /// Advance every peer once and report it to the store
    pub fn step(&mut self, now: DateTime<Utc>) {
        for peer in &mut self.peers {
            match peer.behavior {
                Behavior::Wander => {
                    peer.position.latitude += self.rng.sample(self.walk);
                    peer.position.longitude += self.rng.sample(self.walk);
                }
                Behavior::Parked => {}
                Behavior::Flaky => {
                    peer.has_fix = if peer.has_fix {
                        !self.rng.gen_bool(self.drop_probability)
                    } else {
                        self.rng.gen_bool(self.recover_probability)
                    };
                    if peer.has_fix {
                        peer.position.latitude += self.rng.sample(self.walk) * 0.2;
                    }
                }
            }

            let position = peer.has_fix.then_some(peer.position);
            self.store.upsert_position(&peer.id, position, Some(100), now);
            self.store.touch(&peer.id, Some(peer.name), now);
        }
    }

    pub async fn run(mut self, interval: Duration, shutdown: Shutdown) {
        info!("Mesh simulator started with {} peers", self.peers.len());
        loop {
            self.step(Utc::now());
            debug!("Simulated {} peer reports", self.peers.len());
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        info!("Mesh simulator stopped");
    }
}

/// Local GPS that hovers around a fixed point
pub struct SimulatedGps {
    position: GeoPoint,
    noise: Normal<f64>,
    rng: StdRng,
}

impl SimulatedGps {
    pub fn new(position: GeoPoint) -> Result<Self> {
        Ok(Self {
            position,
            noise: Normal::new(0.0, GPS_NOISE_DEG)?,
            rng: StdRng::from_entropy(),
        })
    }
}

#[async_trait]
impl PositionSource for SimulatedGps {
    fn name(&self) -> &str {
        "simulated-gps"
    }

    async fn read_fix(&mut self) -> Result<Option<(GeoPoint, Option<i32>)>> {
        let fix = GeoPoint::new(
            self.position.latitude + self.rng.sample(self.noise),
            self.position.longitude + self.rng.sample(self.noise),
        );
        Ok(Some((fix, Some(95))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeofenceDefinition;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_anchor_follows_first_fence() {
        let mut config = Config::default();
        config.geofences = vec![GeofenceDefinition::new("Dock", 10.0, 20.0, 1.0)];
        assert_eq!(demo_anchor(&config), GeoPoint::new(10.0, 20.0));

        config.geofences.clear();
        assert_eq!(demo_anchor(&config), DEFAULT_ANCHOR);
    }

    #[test]
    fn test_step_reports_every_peer() {
        let store = NodeStore::new();
        let mut sim = MeshSimulator::seeded(store.clone(), DEFAULT_ANCHOR, 6, 7).unwrap();
        sim.step(t(0));

        assert_eq!(store.len(), 6);
        for id in sim.peer_ids() {
            let node = store.get(&id).unwrap();
            assert_eq!(node.last_seen, t(0));
            assert!(node.name.is_some());
        }
    }

    #[test]
    fn test_parked_peer_stays_put() {
        let store = NodeStore::new();
        let mut sim = MeshSimulator::seeded(store.clone(), DEFAULT_ANCHOR, 3, 11).unwrap();
        // Second peer is parked
        let parked = sim.peer_ids()[1].clone();

        sim.step(t(0));
        let first = store.get(&parked).unwrap().position;
        for i in 1..10 {
            sim.step(t(i * 10));
        }
        assert_eq!(store.get(&parked).unwrap().position, first);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn test_gps_stays_near_anchor() {
        let mut gps = SimulatedGps::new(DEFAULT_ANCHOR).unwrap();
        let (fix, alt) = gps.read_fix().await.unwrap().unwrap();
        assert!((fix.latitude - DEFAULT_ANCHOR.latitude).abs() < 0.001);
        assert_eq!(alt, Some(95));
    }
}
