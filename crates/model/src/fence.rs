//! Circular fences and their validation rules.

use crate::error::{FenceViolation, GeofenceError};
use crate::transition::{TransitionMask, TransitionType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Radius used when a serialized fence omits one (meters).
pub const DEFAULT_RADIUS_M: f64 = 50.0;

/// Loitering delay applied when DWELL is requested without an explicit delay.
pub const DEFAULT_LOITERING_DELAY: Duration = Duration::from_millis(10);

/// Mean Earth radius used for great-circle distances (meters).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS_M
}

/// A named circular region with its monitoring rules.
///
/// Identity is `id`: registering a fence whose id is already active
/// replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fence {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters.
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default)]
    pub transition_mask: TransitionMask,
    /// `None` means the fence never expires.
    #[serde(
        default,
        with = "crate::duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_duration: Option<Duration>,
    #[serde(
        default,
        with = "crate::duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub loitering_delay: Option<Duration>,
}

impl Fence {
    /// A fence watching ENTER and EXIT, never expiring.
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius,
            transition_mask: TransitionMask::default(),
            expiration_duration: None,
            loitering_delay: None,
        }
    }

    /// Replace the transition mask. Requesting DWELL without a loitering
    /// delay installs [`DEFAULT_LOITERING_DELAY`].
    pub fn with_transitions(mut self, mask: TransitionMask) -> Self {
        self.transition_mask = mask;
        if mask.contains(TransitionType::Dwell) && self.loitering_delay.is_none() {
            self.loitering_delay = Some(DEFAULT_LOITERING_DELAY);
        }
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration_duration = Some(expiration);
        self
    }

    pub fn with_loitering_delay(mut self, delay: Duration) -> Self {
        self.loitering_delay = Some(delay);
        self
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Whether `point` lies inside the circle (boundary inclusive).
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center().distance_to(point) <= self.radius
    }

    /// Check every local rule. Does not consult any provider.
    pub fn validate(&self) -> Result<(), GeofenceError> {
        self.violation()
            .map_or(Ok(()), |v| Err(GeofenceError::invalid(self.id.clone(), v)))
    }

    fn violation(&self) -> Option<FenceViolation> {
        if self.id.trim().is_empty() {
            return Some(FenceViolation::EmptyId);
        }
        // NaN fails every range check below.
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Some(FenceViolation::Radius(self.radius));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Some(FenceViolation::Latitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Some(FenceViolation::Longitude(self.longitude));
        }
        if self.transition_mask.is_empty() {
            return Some(FenceViolation::EmptyMask);
        }
        if self.transition_mask.contains(TransitionType::Dwell) && self.loitering_delay.is_none() {
            return Some(FenceViolation::MissingLoiteringDelay);
        }
        None
    }
}
