//! Shared contracts for the geofence registry.
//!
//! Defines the types that flow between the registry, the capability
//! provider and listeners:
//! - [`Fence`] - a circular region with monitoring rules
//! - [`TransitionEvent`] / [`RawTransition`] - crossings, per fence and as the host batches them
//! - [`PermissionState`] - location permission
//! - [`GeofenceError`] - the error taxonomy every operation reports with

mod duration_ms;
mod error;
mod fence;
mod permission;
mod transition;

pub use error::{FenceViolation, GeofenceError, ProviderError, ProviderStatus, Result};
pub use fence::{Coordinate, Fence, DEFAULT_LOITERING_DELAY, DEFAULT_RADIUS_M};
pub use permission::PermissionState;
pub use transition::{
    RawTransition, TransitionEvent, TransitionMask, TransitionType, UnknownTransition,
};

/// Sentinel returned by `count()` when the platform cannot report an exact count.
pub const COUNT_UNSUPPORTED: i64 = -1;
