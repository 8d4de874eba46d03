// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Configuration module
//!
//! [`Config`] is the on-disk TOML document. [`SharedConfig`] is the
//! hot-reload surface: a single writer publishes validated snapshots, each
//! tagged with a generation number, and readers take the current `Arc`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use chrono::TimeDelta;
use tracing::info;

use crate::error::ConfigError;
use crate::geo::{GeoPoint, DEFAULT_EARTH_RADIUS_KM};

/// Longest accepted period setting (ten years)
pub const MAX_PERIOD_SECS: u64 = 10 * 365 * 24 * 3600;

/// Seconds as a chrono span, saturating instead of overflowing
pub fn span(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable demo mode (simulated peers)
    pub demo_mode: bool,

    /// Mesh id of the local node, excluded from evaluation
    pub local_node_id: Option<String>,

    /// Seconds between evaluation ticks
    pub check_interval_secs: u64,

    /// Trailing window a node must hold still for, in seconds
    pub stationary_time_threshold_secs: u64,

    /// Maximum displacement across the window still counted as stationary
    pub stationary_distance_threshold_km: f64,

    /// Earth radius used by the distance function
    pub earth_radius_km: f64,

    /// Minimum seconds between two dispatches of the same notification
    pub notification_cooldown_secs: u64,

    /// Position samples kept per node
    pub history_capacity: usize,

    /// Seconds between stale-node sweeps
    pub stale_cleanup_interval_secs: u64,

    /// Nodes unseen for longer than this are swept
    pub stale_max_age_secs: u64,

    /// Sleep after a failed tick
    pub error_backoff_secs: u64,

    /// Delay before the first tick so peers can be discovered
    pub startup_delay_secs: u64,

    /// LED proximity feedback
    pub led: LedConfig,

    /// Active geofences
    pub geofences: Vec<GeofenceDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            demo_mode: true,
            local_node_id: None,
            check_interval_secs: 10,
            stationary_time_threshold_secs: 300,
            stationary_distance_threshold_km: 0.05,
            earth_radius_km: DEFAULT_EARTH_RADIUS_KM,
            notification_cooldown_secs: 60,
            history_capacity: 50,
            stale_cleanup_interval_secs: 3600,
            stale_max_age_secs: 7200,
            error_backoff_secs: 15,
            startup_delay_secs: 5,
            led: LedConfig::default(),
            geofences: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("meshfence"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Reject anything the evaluation engine must never observe
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("check_interval_secs", self.check_interval_secs > 0),
            ("stationary_time_threshold_secs", self.stationary_time_threshold_secs > 0),
            (
                "stationary_distance_threshold_km",
                self.stationary_distance_threshold_km.is_finite()
                    && self.stationary_distance_threshold_km > 0.0,
            ),
            ("earth_radius_km", self.earth_radius_km.is_finite() && self.earth_radius_km > 0.0),
            ("history_capacity", self.history_capacity >= 2),
            ("stale_cleanup_interval_secs", self.stale_cleanup_interval_secs > 0),
            ("stale_max_age_secs", self.stale_max_age_secs > 0),
            ("error_backoff_secs", self.error_backoff_secs > 0),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::NonPositive { field: *field });
        }

        let periods = [
            ("check_interval_secs", self.check_interval_secs),
            ("stationary_time_threshold_secs", self.stationary_time_threshold_secs),
            ("notification_cooldown_secs", self.notification_cooldown_secs),
            ("stale_cleanup_interval_secs", self.stale_cleanup_interval_secs),
            ("stale_max_age_secs", self.stale_max_age_secs),
            ("error_backoff_secs", self.error_backoff_secs),
            ("startup_delay_secs", self.startup_delay_secs),
        ];
        if let Some((field, _)) = periods.iter().find(|(_, secs)| *secs > MAX_PERIOD_SECS) {
            return Err(ConfigError::TooLarge {
                field: *field,
                max: MAX_PERIOD_SECS,
            });
        }

        let mut names = HashSet::new();
        for (index, fence) in self.geofences.iter().enumerate() {
            fence.validate(index)?;
            if !names.insert(fence.name.as_str()) {
                return Err(ConfigError::DuplicateFence(fence.name.clone()));
            }
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn stale_cleanup_interval(&self) -> TimeDelta {
        span(self.stale_cleanup_interval_secs)
    }

    pub fn stale_max_age(&self) -> TimeDelta {
        span(self.stale_max_age_secs)
    }
}

/// A named circular region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceDefinition {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl GeofenceDefinition {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            radius_km,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyFenceName { index });
        }
        if !(self.radius_km.is_finite() && self.radius_km > 0.0) {
            return Err(ConfigError::InvalidRadius {
                name: self.name.clone(),
                radius_km: self.radius_km,
            });
        }
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if !lat_ok || !lon_ok {
            return Err(ConfigError::InvalidCoordinates {
                name: self.name.clone(),
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        Ok(())
    }
}

/// LED proximity feedback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// Drive the device LED from the closest-node distance
    pub enabled: bool,

    /// Blink rate at or below `min_distance_km`
    pub max_frequency_hz: f64,

    /// Distance at which the blink rate saturates
    pub min_distance_km: f64,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_frequency_hz: 2.0,
            min_distance_km: 0.1,
        }
    }
}

/// One published configuration generation
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub generation: u64,
    pub config: Config,
}

/// Versioned configuration handle shared between workers
#[derive(Clone)]
pub struct SharedConfig {
    current: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl SharedConfig {
    /// Wrap an initial configuration as generation 1
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(ConfigSnapshot {
                generation: 1,
                config,
            }))),
        })
    }

    /// Current snapshot; cheap, never blocks on readers
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Validate and swap in a new configuration, returning its generation
    pub fn publish(&self, config: Config) -> Result<u64, ConfigError> {
        config.validate()?;
        let mut current = self.current.write();
        let generation = current.generation + 1;
        *current = Arc::new(ConfigSnapshot { generation, config });
        info!("Published configuration generation {}", generation);
        Ok(generation)
    }

    /// Apply an edit to a copy of the current configuration and publish it
    pub fn update<F>(&self, edit: F) -> Result<u64, ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.snapshot().config.clone();
        edit(&mut config);
        self.publish(config)
    }
}
