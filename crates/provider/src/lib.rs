//! Host capability contract for geofencing.
//!
//! The registry never talks to a location engine directly. Everything it
//! needs from the host - monitoring calls, permission queries and the push
//! stream of crossings - goes through [`CapabilityProvider`].
//!
//! Two implementations ship with the crate:
//! - [`NullProvider`] for platforms without geofencing
//! - [`SimulatedProvider`], an in-memory host that detects crossings from
//!   scripted positions (tests, the simulator app)

mod null;
mod simulated;

pub use null::NullProvider;
pub use simulated::{SimulatedProvider, DEFAULT_FENCE_LIMIT, EVENT_CHANNEL_CAPACITY};

use async_trait::async_trait;
use geofence_model::{Fence, PermissionState, ProviderError, RawTransition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something the host pushes to the registry without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A crossing detected by the host engine.
    Transition(RawTransition),
    /// The user changed the location permission outside the app.
    PermissionChanged(PermissionState),
}

/// Options for the host's foreground notification while monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Host resource reference for the notification icon.
    #[serde(default)]
    pub small_icon: Option<String>,
}

impl NotificationOptions {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.text.is_none() && self.small_icon.is_none()
    }
}

/// The host's location and geofencing capability.
///
/// Uses async_trait so the registry can hold it as `Arc<dyn CapabilityProvider>`.
/// Events on the push stream are in chronological order relative to each
/// other, but unordered relative to registry calls.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Whether [`count`](Self::count) reports an exact number.
    fn supports_counting(&self) -> bool;

    /// Start monitoring one fence. Re-registering an id replaces it.
    async fn begin_monitoring(&self, fence: &Fence) -> Result<(), ProviderError>;

    /// Stop monitoring the given ids. Unknown ids are ignored by the host.
    async fn stop_monitoring(&self, ids: &[String]) -> Result<(), ProviderError>;

    /// Synchronous permission query.
    fn current_permission_state(&self) -> PermissionState;

    /// Run the OS consent flow. May suspend until the user answers.
    async fn request_permission(&self) -> PermissionState;

    /// Number of fences the host is monitoring. Only called when
    /// [`supports_counting`](Self::supports_counting) is true.
    async fn count(&self) -> Result<usize, ProviderError>;

    /// Apply foreground notification options. Hosts without such a
    /// notification accept and ignore them.
    async fn configure(&self, _options: &NotificationOptions) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Take the push stream. Returns `None` once taken, or when the host
    /// never pushes anything.
    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>>;
}

/// Shared provider reference.
pub type ProviderRef = Arc<dyn CapabilityProvider>;
