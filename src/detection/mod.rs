//! Detection module - geofence membership and motion state per node

pub mod geofence;
pub mod stationary;

pub use geofence::GeofenceEngine;
pub use stationary::{LocationSample, StationaryEngine, DEFAULT_HISTORY_CAPACITY};

use std::fmt;
use serde::{Deserialize, Serialize};

/// Transition kinds produced by the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    GeofenceEnter,
    GeofenceExit,
    StationaryStarted,
    StationaryEnded,
}

impl EventKind {
    /// Prefix of the cooldown key for this kind
    pub fn key_prefix(&self) -> &'static str {
        match self {
            EventKind::GeofenceEnter => "geofence_enter",
            EventKind::GeofenceExit => "geofence_exit",
            EventKind::StationaryStarted => "stationary_start",
            EventKind::StationaryEnded => "stationary_stop",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// Why a node left a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Recomputed distance put the node outside (or it could not be computed)
    OutsideRadius,
    /// The node no longer reports a position
    PositionUnknown,
}

/// What happened, with the measurements that go into the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventDetail {
    Entered {
        fence: String,
        radius_km: f64,
        distance_km: f64,
    },
    Exited {
        fence: String,
        radius_km: f64,
        /// `None` renders as "unknown distance"
        distance_km: Option<f64>,
        reason: ExitReason,
    },
    StationaryStarted {
        threshold_secs: u64,
        moved_km: f64,
    },
    StationaryEnded {
        moved_km: f64,
        span_secs: i64,
    },
}

/// A state transition for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub node_id: String,
    pub node_name: String,
    pub detail: EventDetail,
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self.detail {
            EventDetail::Entered { .. } => EventKind::GeofenceEnter,
            EventDetail::Exited { .. } => EventKind::GeofenceExit,
            EventDetail::StationaryStarted { .. } => EventKind::StationaryStarted,
            EventDetail::StationaryEnded { .. } => EventKind::StationaryEnded,
        }
    }

    pub fn fence_name(&self) -> Option<&str> {
        match &self.detail {
            EventDetail::Entered { fence, .. } | EventDetail::Exited { fence, .. } => {
                Some(fence.as_str())
            }
            _ => None,
        }
    }

    /// Measured distance: to the fence center, or displacement for motion events
    pub fn distance_km(&self) -> Option<f64> {
        match self.detail {
            EventDetail::Entered { distance_km, .. } => Some(distance_km),
            EventDetail::Exited { distance_km, .. } => distance_km,
            EventDetail::StationaryStarted { moved_km, .. }
            | EventDetail::StationaryEnded { moved_km, .. } => Some(moved_km),
        }
    }

    /// Cooldown identity: `{kind}_{node id}_{fence name or empty}`
    pub fn notification_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.kind().key_prefix(),
            self.node_id,
            self.fence_name().unwrap_or("")
        )
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = format!("{} ({})", self.node_name, self.node_id);
        match &self.detail {
            EventDetail::Entered { fence, radius_km, distance_km } => write!(
                f,
                "{} entered geofence '{}' (dist {:.2}km <= radius {}km).",
                who, fence, distance_km, radius_km
            ),
            EventDetail::Exited { fence, reason: ExitReason::PositionUnknown, .. } => {
                write!(f, "{} exited geofence '{}' (position unknown).", who, fence)
            }
            EventDetail::Exited { fence, radius_km, distance_km, .. } => {
                let dist = match distance_km {
                    Some(d) => format!("{:.2}km", d),
                    None => "unknown distance".to_string(),
                };
                write!(
                    f,
                    "{} exited geofence '{}' (dist {} > radius {}km).",
                    who, fence, dist, radius_km
                )
            }
            EventDetail::StationaryStarted { threshold_secs, moved_km } => write!(
                f,
                "{} has been stationary for >{}s (moved {:.1}m).",
                who,
                threshold_secs,
                moved_km * 1000.0
            ),
            EventDetail::StationaryEnded { moved_km, span_secs } => write!(
                f,
                "{} is moving again (moved {:.1}m in {}s).",
                who,
                moved_km * 1000.0,
                span_secs
            ),
        }
    }
}
