//! Registry configuration, accepted once at `initialize`.

use geofence_provider::NotificationOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Options recognized by [`Registry::initialize`](crate::Registry::initialize).
///
/// Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeofenceConfig {
    /// Title of the host's foreground notification while monitoring.
    pub notification_title: Option<String>,
    pub notification_text: Option<String>,
    /// Host resource reference for the notification icon.
    pub small_icon: Option<String>,
    /// Re-register every known fence with the host during `initialize`.
    #[serde(rename = "androidForceReregister", alias = "forceReregister")]
    pub force_reregister: bool,
    /// Duplicate `(fence, transition)` reports closer than this are merged.
    /// Zero passes everything through.
    pub coalescing_window_ms: u64,
    /// Reject a second `initialize` instead of ignoring it.
    pub strict_initialize: bool,
}

impl GeofenceConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_notification(mut self, title: impl Into<String>, text: impl Into<String>) -> Self {
        self.notification_title = Some(title.into());
        self.notification_text = Some(text.into());
        self
    }

    pub fn with_small_icon(mut self, icon: impl Into<String>) -> Self {
        self.small_icon = Some(icon.into());
        self
    }

    pub fn with_force_reregister(mut self, enabled: bool) -> Self {
        self.force_reregister = enabled;
        self
    }

    pub fn with_coalescing_window(mut self, window: Duration) -> Self {
        self.coalescing_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_strict_initialize(mut self, strict: bool) -> Self {
        self.strict_initialize = strict;
        self
    }

    pub fn coalescing_window(&self) -> Duration {
        Duration::from_millis(self.coalescing_window_ms)
    }

    pub fn notification_options(&self) -> NotificationOptions {
        NotificationOptions {
            title: self.notification_title.clone(),
            text: self.notification_text.clone(),
            small_icon: self.small_icon.clone(),
        }
    }
}
