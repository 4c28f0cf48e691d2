//! Permission queries with a single in-flight consent request.

use futures::future::{BoxFuture, FutureExt, Shared};
use geofence_model::PermissionState;
use geofence_provider::ProviderRef;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

type PendingRequest = Shared<BoxFuture<'static, PermissionState>>;

/// Funnels permission requests so concurrent callers share one OS prompt.
pub(crate) struct PermissionGate {
    provider: ProviderRef,
    pending: Arc<Mutex<Option<PendingRequest>>>,
    updates: Arc<watch::Sender<PermissionState>>,
}

impl PermissionGate {
    pub(crate) fn new(provider: ProviderRef) -> Self {
        let (updates, _) = watch::channel(provider.current_permission_state());
        Self {
            provider,
            pending: Arc::new(Mutex::new(None)),
            updates: Arc::new(updates),
        }
    }

    pub(crate) fn check(&self) -> PermissionState {
        self.provider.current_permission_state()
    }

    /// Run the consent flow, or join the one already running.
    pub(crate) async fn request(&self) -> PermissionState {
        let request = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(request) => {
                    tracing::debug!("Joining in-flight permission request");
                    request.clone()
                }
                None => {
                    let request = self.start_request();
                    *pending = Some(request.clone());
                    request
                }
            }
        };

        let state = request.await;
        self.updates.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        state
    }

    fn start_request(&self) -> PendingRequest {
        let provider = Arc::clone(&self.provider);
        let slot = Arc::clone(&self.pending);

        async move {
            tracing::info!("Requesting location permission");
            let state = provider.request_permission().await;
            // Later callers start a fresh prompt.
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
            tracing::info!(permission = %state, "Permission request resolved");
            state
        }
        .boxed()
        .shared()
    }

    pub(crate) fn updates(&self) -> &Arc<watch::Sender<PermissionState>> {
        &self.updates
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.updates.subscribe()
    }
}
