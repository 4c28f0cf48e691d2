//! Error taxonomy for registry and dispatcher operations.

use thiserror::Error;

/// Result type for geofence operations.
pub type Result<T> = std::result::Result<T, GeofenceError>;

/// Errors surfaced to callers of the registry and dispatcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    /// Fence failed local validation. Never reaches the provider.
    #[error("invalid fence '{id}': {violation}")]
    InvalidFence { id: String, violation: FenceViolation },

    /// Operation referenced an id that is not registered.
    #[error("fence not found: {0}")]
    NotFound(String),

    /// The host capability rejected the call.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The listener can never be invoked.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// `initialize` was called twice under the strict policy.
    #[error("registry already initialized")]
    AlreadyInitialized,
}

impl GeofenceError {
    pub fn invalid(id: impl Into<String>, violation: FenceViolation) -> Self {
        Self::InvalidFence {
            id: id.into(),
            violation,
        }
    }

    pub fn is_invalid_fence(&self) -> bool {
        matches!(self, Self::InvalidFence { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The validation rule a fence broke.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FenceViolation {
    #[error("id must not be empty")]
    EmptyId,

    #[error("radius must be a positive number of meters, got {0}")]
    Radius(f64),

    #[error("latitude must be within [-90, 90], got {0}")]
    Latitude(f64),

    #[error("longitude must be within [-180, 180], got {0}")]
    Longitude(f64),

    #[error("transition mask must contain at least one transition")]
    EmptyMask,

    #[error("DWELL monitoring requires a loitering delay")]
    MissingLoiteringDelay,
}

/// Status reported by the host geofencing engine alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    /// Geofencing is unavailable (location services off, no permission at OS level).
    NotAvailable,
    /// The host limit on registered fences was reached.
    TooManyFences,
    /// The host limit on pending registration requests was reached.
    TooManyPendingRequests,
    /// The host refused the call for lack of location permission.
    PermissionDenied,
    /// Anything the host did not classify.
    Unknown,
}

impl ProviderStatus {
    /// Map a host status code to a status.
    pub fn from_code(code: i32) -> Self {
        match code {
            1000 => Self::NotAvailable,
            1001 => Self::TooManyFences,
            1002 => Self::TooManyPendingRequests,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAvailable => "GEOFENCE_NOT_AVAILABLE",
            Self::TooManyFences => "GEOFENCE_TOO_MANY_GEOFENCES",
            Self::TooManyPendingRequests => "GEOFENCE_TOO_MANY_PENDING_INTENTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque failure reported by a capability provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider rejected the call ({status}): {reason}")]
pub struct ProviderError {
    pub status: ProviderStatus,
    pub reason: String,
}

impl ProviderError {
    pub fn new(status: ProviderStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// Build from a raw host status code.
    pub fn from_code(code: i32, reason: impl Into<String>) -> Self {
        Self::new(ProviderStatus::from_code(code), reason)
    }
}
