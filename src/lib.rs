// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MeshFence - node-state evaluation for mesh radio networks
//!
//! Watches the positions of every node heard on the mesh and reports:
//! - geofence entries and exits against named circular zones
//! - nodes that have stopped moving, and when they move again
//! - the distance to the closest peer, as LED blink feedback
//!
//! Notifications are throttled per event before going out over the radio;
//! the local event feed receives every transition.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Monitor (tick)                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌──────────┐  │
//! │  │ NodeStore │→ │ Stationary│→ │  Geofence  │→ │ Throttle │→ radio
//! │  │ snapshot  │  │  history  │  │ membership │  │          │  │
//! │  └───────────┘  └───────────┘  └────────────┘  └──────────┘  │
//! │        ↑                              ↓                      │
//! │  ingestion / GPS              ┌──────────────┐  ┌─────────┐  │
//! │                               │  Event Bus   │  │   LED   │  │
//! │                               └──────────────┘  └─────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod geo;
pub mod nodes;
pub mod notify;
pub mod simulator;

// Re-exports for convenience
pub use config::{Config, GeofenceDefinition, LedConfig, SharedConfig};
pub use core::{EventBus, FeedEntry, Monitor, Shutdown, StatusReport, TickReport};
pub use detection::{EventKind, GeofenceEngine, NodeEvent, StationaryEngine};
pub use error::{ConfigError, EvalError, SinkError};
pub use geo::{GeoPoint, Haversine};
pub use nodes::{NodeState, NodeStore};
pub use notify::{NotificationSink, NotificationThrottle, ProximityIndicator};

/// MeshFence version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MeshFence name
pub const NAME: &str = "MeshFence";
