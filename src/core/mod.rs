//! Core engine module - tick orchestration, event feed and shutdown

mod engine;
mod scheduler;
mod event_bus;
mod shutdown;

pub use engine::{Monitor, TickReport};
pub use scheduler::Scheduler;
pub use event_bus::{EventBus, FeedEntry, DEFAULT_FEED_CAPACITY};
pub use shutdown::Shutdown;

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the display surface shows, republished after every tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub config_generation: u64,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub nodes_evaluated: usize,
    pub failed_nodes: usize,
    /// fence name -> ids of nodes inside
    pub geofence_summary: BTreeMap<String, Vec<String>>,
    pub stationary_nodes: Vec<String>,
    /// Distance from the local node to the closest evaluated peer
    pub closest_node_km: Option<f64>,
    pub total_events: u64,
    pub total_dispatched: u64,
}
