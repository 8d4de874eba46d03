// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Great-circle distance on a spherical earth
//!
//! Distances are returned as `Option<f64>` kilometers. `None` is the
//! "undefined" value: one of the points is missing or carries a non-finite
//! coordinate. Callers check it explicitly; nothing here panics.

use serde::{Deserialize, Serialize};

/// Mean earth radius used by default, in kilometers
pub const DEFAULT_EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Both coordinates are finite numbers
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Haversine distance with a configurable earth radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Haversine {
    earth_radius_km: f64,
}

impl Haversine {
    pub fn new(earth_radius_km: f64) -> Self {
        Self { earth_radius_km }
    }

    pub fn earth_radius_km(&self) -> f64 {
        self.earth_radius_km
    }

    /// Distance between two optional points, `None` when undefined
    pub fn distance(&self, a: Option<GeoPoint>, b: Option<GeoPoint>) -> Option<f64> {
        match (a, b) {
            (Some(a), Some(b)) => self.between(a, b),
            _ => None,
        }
    }

    /// Distance between two points, `None` if either is not finite
    pub fn between(&self, a: GeoPoint, b: GeoPoint) -> Option<f64> {
        if !a.is_valid() || !b.is_valid() || !self.earth_radius_km.is_finite() {
            return None;
        }

        let dlat = (b.latitude - a.latitude).to_radians();
        let dlon = (b.longitude - a.longitude).to_radians();
        let lat1 = a.latitude.to_radians();
        let lat2 = b.latitude.to_radians();

        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        // Rounding can push h a hair outside [0, 1] for antipodal points
        let h = h.clamp(0.0, 1.0);
        let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

        Some(self.earth_radius_km * c)
    }
}

impl Default for Haversine {
    fn default() -> Self {
        Self::new(DEFAULT_EARTH_RADIUS_KM)
    }
}
