//! Provider for platforms without geofencing.

use crate::{CapabilityProvider, ProviderEvent};
use async_trait::async_trait;
use geofence_model::{Fence, PermissionState, ProviderError, ProviderStatus};
use tokio::sync::mpsc;

/// Null implementation for testing or unsupported platforms.
///
/// Rejects every registration as unavailable and never pushes events.
pub struct NullProvider;

#[async_trait]
impl CapabilityProvider for NullProvider {
    fn supports_counting(&self) -> bool {
        false
    }

    async fn begin_monitoring(&self, fence: &Fence) -> Result<(), ProviderError> {
        Err(ProviderError::new(
            ProviderStatus::NotAvailable,
            format!("geofencing is not available on this platform (fence '{}')", fence.id),
        ))
    }

    async fn stop_monitoring(&self, _ids: &[String]) -> Result<(), ProviderError> {
        Ok(())
    }

    fn current_permission_state(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn count(&self) -> Result<usize, ProviderError> {
        Ok(0)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_provider_rejects_monitoring() {
        let provider = NullProvider;
        let err = provider
            .begin_monitoring(&Fence::new("a", 0.0, 0.0, 10.0))
            .await
            .unwrap_err();
        assert_eq!(err.status, ProviderStatus::NotAvailable);
        assert!(!provider.supports_counting());
        assert!(provider.take_events().is_none());
    }
}
