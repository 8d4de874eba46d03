// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! LED proximity feedback
//!
//! The closest-node distance becomes a blink frequency, the frequency a
//! coarse LED mode. Devices differ in which setting drives the LED, so a mode
//! is applied by probing candidate keys in order until one is accepted.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LedConfig;
use crate::error::SinkError;

/// Settings tried, in order, when writing an LED mode
pub const LED_CANDIDATE_KEYS: [&str; 4] = [
    "device.led_mode",
    "led.mode",
    "led.blink",
    "led.brightness",
];

/// Logical LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    On,
    Slow,
    Fast,
}

impl LedMode {
    /// Coarse mode for a blink frequency
    pub fn from_frequency(frequency_hz: Option<f64>) -> Self {
        match frequency_hz {
            Some(f) if f > 1.5 => LedMode::Fast,
            Some(f) if f > 0.2 => LedMode::Slow,
            _ => LedMode::Off,
        }
    }

    /// Value written for this mode under `key`
    pub fn value_for_key(&self, key: &str) -> u8 {
        if key.contains("brightness") {
            return match self {
                LedMode::Off => 0,
                LedMode::On => 255,
                LedMode::Slow | LedMode::Fast => 128,
            };
        }
        match self {
            LedMode::Off => 0,
            LedMode::On => 1,
            LedMode::Slow => 2,
            LedMode::Fast => 3,
        }
    }
}

impl fmt::Display for LedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedMode::Off => "off",
            LedMode::On => "on",
            LedMode::Slow => "slow",
            LedMode::Fast => "fast",
        };
        f.write_str(name)
    }
}

/// A device exposing key/value settings that may control its LED
pub trait LedDevice: Send + Sync {
    fn set_config(&self, key: &str, value: u8) -> Result<(), SinkError>;
}

/// Device that only logs what it would have written
pub struct LogLedDevice;

impl LedDevice for LogLedDevice {
    fn set_config(&self, key: &str, value: u8) -> Result<(), SinkError> {
        debug!("LED config {}={}", key, value);
        Ok(())
    }
}

/// Blink frequency for the closest-node distance, `None` when the LED should be off
pub fn blink_frequency(closest_km: Option<f64>, config: &LedConfig) -> Option<f64> {
    if !config.enabled || config.max_frequency_hz <= 0.0 {
        return None;
    }
    let distance = closest_km.filter(|d| d.is_finite())?;

    let min_dist = config.min_distance_km.max(0.001);
    let max_freq = config.max_frequency_hz;
    let scale = min_dist / distance.max(min_dist);

    Some((scale * max_freq).clamp(0.1, max_freq))
}

/// Drives an [`LedDevice`] from closest-node distances
pub struct ProximityIndicator {
    device: Arc<dyn LedDevice>,
    config: LedConfig,
    current: Option<LedMode>,
    // mode the device refused on every key; not retried until something changes
    rejected: Option<LedMode>,
}

impl ProximityIndicator {
    pub fn new(device: Arc<dyn LedDevice>, config: LedConfig) -> Self {
        Self {
            device,
            config,
            current: None,
            rejected: None,
        }
    }

    pub fn set_config(&mut self, config: LedConfig) {
        if config != self.config {
            self.config = config;
            // Force a rewrite under the new settings
            self.current = None;
            self.rejected = None;
        }
    }

    pub fn current(&self) -> Option<LedMode> {
        self.current
    }

    /// Map the distance to a mode and write it if it changed
    ///
    /// A mode the device rejected is reported once; asking for it again is a
    /// no-op until the mode or the config changes.
    pub fn update(&mut self, closest_km: Option<f64>) -> Result<LedMode, SinkError> {
        let frequency = blink_frequency(closest_km, &self.config);
        let mode = LedMode::from_frequency(frequency);

        if self.current == Some(mode) || self.rejected == Some(mode) {
            return Ok(mode);
        }

        if let Err(e) = self.apply(mode) {
            self.rejected = Some(mode);
            return Err(e);
        }
        self.rejected = None;
        self.current = Some(mode);
        Ok(mode)
    }

    fn apply(&self, mode: LedMode) -> Result<(), SinkError> {
        let mut last_error = None;
        for key in LED_CANDIDATE_KEYS {
            let value = mode.value_for_key(key);
            match self.device.set_config(key, value) {
                Ok(()) => {
                    info!("LED config set: {}={} ({})", key, value, mode);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Attempt to set LED config '{}' failed: {}", key, e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = &last_error {
            warn!("Failed to set LED configuration (last error): {}", e);
        }
        Err(SinkError::NoCapability {
            mode: mode.to_string(),
        })
    }
}
