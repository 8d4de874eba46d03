// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Error types

use thiserror::Error;

/// Configuration could not be loaded, saved or accepted
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Geofence #{index} has an empty name")]
    EmptyFenceName { index: usize },

    #[error("Duplicate geofence name '{0}'")]
    DuplicateFence(String),

    #[error("Geofence '{name}' radius must be positive (got {radius_km})")]
    InvalidRadius { name: String, radius_km: f64 },

    #[error("Geofence '{name}' has out-of-range coordinates ({latitude}, {longitude})")]
    InvalidCoordinates {
        name: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("Setting '{field}' must be positive")]
    NonPositive { field: &'static str },

    #[error("Setting '{field}' exceeds {max}s")]
    TooLarge { field: &'static str, max: u64 },
}

/// An output collaborator refused a message or device write
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink '{0}' is closed")]
    Closed(&'static str),

    #[error("Device rejected '{key}': {reason}")]
    Rejected { key: String, reason: String },

    #[error("No LED capability accepted mode {mode}")]
    NoCapability { mode: String },
}

/// Failure while evaluating a single node during a tick
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Dispatch failed for {node_id}: {source}")]
    Dispatch {
        node_id: String,
        #[source]
        source: SinkError,
    },
}
