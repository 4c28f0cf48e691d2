//! The geofence registry: single source of truth for monitored fences.

use crate::config::GeofenceConfig;
use crate::fence_set::FenceSet;
use crate::permission::PermissionGate;
use chrono::{DateTime, Utc};
use geofence_dispatch::{spawn_pump, Dispatcher, PumpHandle, Subscription, TransitionCallback};
use geofence_model::{Fence, GeofenceError, PermissionState, Result, COUNT_UNSUPPORTED};
use geofence_provider::{ProviderEvent, ProviderRef};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

#[derive(Default)]
struct Lifecycle {
    /// Set while initialized.
    config: Option<GeofenceConfig>,
    pump: Option<PumpHandle>,
    /// Provider stream kept across a shutdown so a later initialize can resume it.
    parked_events: Option<mpsc::Receiver<ProviderEvent>>,
}

/// Owns the fence set and mediates every call to the capability provider.
///
/// Mutations (`add`, `remove`, `clear` and their batch forms) are
/// serialized by one lock held across validation and the provider call,
/// so concurrent callers see a single consistent history.
pub struct Registry {
    provider: ProviderRef,
    fences: Mutex<FenceSet>,
    dispatcher: Dispatcher,
    permission: PermissionGate,
    lifecycle: Mutex<Lifecycle>,
}

impl Registry {
    pub fn new(provider: ProviderRef) -> Self {
        Self {
            permission: PermissionGate::new(Arc::clone(&provider)),
            provider,
            fences: Mutex::new(FenceSet::default()),
            dispatcher: Dispatcher::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// One-time setup: applies notification options, starts delivering
    /// provider events and optionally re-registers known fences.
    ///
    /// A repeat call is a no-op with a warning, or `AlreadyInitialized`
    /// when the active config set `strict_initialize`. Must be called from
    /// within a tokio runtime.
    pub async fn initialize(&self, config: GeofenceConfig) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(active) = &lifecycle.config {
            if active.strict_initialize {
                return Err(GeofenceError::AlreadyInitialized);
            }
            tracing::warn!("Registry already initialized; ignoring repeat initialize");
            return Ok(());
        }

        let options = config.notification_options();
        if !options.is_empty() {
            self.provider.configure(&options).await?;
        }

        self.dispatcher.reopen();
        self.dispatcher.set_coalescing_window(config.coalescing_window());

        let events = lifecycle
            .parked_events
            .take()
            .or_else(|| self.provider.take_events());
        match events {
            Some(events) => {
                lifecycle.pump = Some(spawn_pump(
                    self.dispatcher.clone(),
                    events,
                    Arc::clone(self.permission.updates()),
                ));
            }
            None => tracing::debug!("Provider has no event stream; transitions will not be delivered"),
        }

        let force_reregister = config.force_reregister;
        lifecycle.config = Some(config);
        drop(lifecycle);

        tracing::info!(force_reregister, "Registry initialized");

        if force_reregister {
            let failed = self
                .reregister_all()
                .await
                .into_iter()
                .filter(|(_, result)| result.is_err())
                .count();
            if failed > 0 {
                tracing::warn!(failed, "Some fences could not be re-registered");
            }
        }
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.lifecycle.lock().await.config.is_some()
    }

    /// Stop delivery, drop every listener and return to the uninitialized
    /// state. Registered fences are kept.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(pump) = lifecycle.pump.take() {
            lifecycle.parked_events = pump.stop().await;
        }
        self.dispatcher.close();
        lifecycle.config = None;
        tracing::info!("Registry shut down");
    }

    pub fn check_permission(&self) -> PermissionState {
        self.permission.check()
    }

    /// Run the OS consent flow. Concurrent callers share a single prompt.
    ///
    /// There is no timeout: if the host never answers, neither does this.
    pub async fn request_permission(&self) -> PermissionState {
        self.permission.request().await
    }

    /// Permission changes, from requests and from the host.
    pub fn permission_updates(&self) -> watch::Receiver<PermissionState> {
        self.permission.subscribe()
    }

    /// Validate and register one fence, replacing any fence with the same id.
    ///
    /// On a provider failure the fence set is left as it was.
    pub async fn add(&self, fence: Fence) -> Result<()> {
        let mut fences = self.fences.lock().await;
        self.add_locked(&mut fences, fence).await
    }

    /// Register each fence in order. Results line up with the input.
    pub async fn add_all(&self, batch: Vec<Fence>) -> Vec<Result<()>> {
        let mut fences = self.fences.lock().await;
        let mut results = Vec::with_capacity(batch.len());
        for fence in batch {
            results.push(self.add_locked(&mut fences, fence).await);
        }
        results
    }

    async fn add_locked(&self, fences: &mut FenceSet, fence: Fence) -> Result<()> {
        fence.validate()?;

        if let Err(err) = self.provider.begin_monitoring(&fence).await {
            tracing::warn!(fence_id = %fence.id, error = %err, "Provider rejected fence");
            return Err(err.into());
        }

        let id = fence.id.clone();
        if fences.insert(fence, Utc::now()) {
            self.dispatcher.forget(&id);
            tracing::debug!(fence_id = %id, "Fence replaced");
        } else {
            self.dispatcher.activate(&id);
            tracing::debug!(fence_id = %id, "Fence added");
        }
        Ok(())
    }

    /// Stop monitoring one fence. Unknown ids are `NotFound`.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut fences = self.fences.lock().await;
        self.remove_locked(&mut fences, id).await
    }

    /// Remove each id in order. Results line up with the input.
    pub async fn remove_all<S>(&self, ids: &[S]) -> Vec<Result<()>>
    where
        S: AsRef<str> + Sync,
    {
        let mut fences = self.fences.lock().await;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.remove_locked(&mut fences, id.as_ref()).await);
        }
        results
    }

    async fn remove_locked(&self, fences: &mut FenceSet, id: &str) -> Result<()> {
        if !fences.contains(id) {
            return Err(GeofenceError::NotFound(id.to_string()));
        }

        if let Err(err) = self.provider.stop_monitoring(&[id.to_string()]).await {
            tracing::warn!(fence_id = %id, error = %err, "Provider failed to stop monitoring");
            return Err(err.into());
        }

        fences.remove(id);
        self.dispatcher.retire(id, Utc::now());
        tracing::debug!(fence_id = %id, "Fence removed");
        Ok(())
    }

    /// Remove every fence. Always succeeds; a provider failure is logged
    /// and the local set is emptied regardless.
    pub async fn clear(&self) {
        let mut fences = self.fences.lock().await;
        if !fences.is_empty() {
            let ids = fences.ids();
            if let Err(err) = self.provider.stop_monitoring(&ids).await {
                tracing::error!(error = %err, fences = ids.len(), "Provider failed to stop monitoring during clear");
            }
            let removed_at = Utc::now();
            for id in &ids {
                self.dispatcher.retire(id, removed_at);
            }
            tracing::info!(fences = ids.len(), "Cleared all fences");
        }
        fences.clear();
        self.dispatcher.forget_all();
    }

    /// Number of fences the platform is monitoring, or
    /// [`COUNT_UNSUPPORTED`] when it cannot report an exact count.
    pub async fn count(&self) -> Result<i64> {
        if !self.provider.supports_counting() {
            return Ok(COUNT_UNSUPPORTED);
        }
        let count = self.provider.count().await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Number of fences in the registry's own set.
    pub async fn len(&self) -> usize {
        self.fences.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fences.lock().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Fence> {
        self.fences.lock().await.get(id).cloned()
    }

    /// Re-issue `begin_monitoring` for every registered fence, sorted by id.
    ///
    /// Fences the provider rejects stay registered; the results say which.
    pub async fn reregister_all(&self) -> Vec<(String, Result<()>)> {
        let fences = self.fences.lock().await;
        let mut results = Vec::with_capacity(fences.len());
        for fence in fences.fences() {
            let result = self.provider.begin_monitoring(&fence).await.map_err(|err| {
                tracing::warn!(fence_id = %fence.id, error = %err, "Re-registration failed");
                GeofenceError::from(err)
            });
            results.push((fence.id, result));
        }
        tracing::info!(fences = results.len(), "Re-registered fences with provider");
        results
    }

    /// Drop fences whose expiration elapsed by `now`. The host expires
    /// them on its own, so the provider is not called.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut fences = self.fences.lock().await;
        let expired = fences.expired_ids(now);
        for id in &expired {
            fences.remove(id);
            self.dispatcher.retire(id, now);
        }
        if !expired.is_empty() {
            tracing::info!(purged = expired.len(), "Purged expired fences");
        }
        expired
    }

    /// Every registered fence, sorted by id.
    pub async fn snapshot(&self) -> Vec<Fence> {
        self.fences.lock().await.fences()
    }

    /// Re-add fences from a snapshot with `add_all` semantics.
    pub async fn restore(&self, fences: Vec<Fence>) -> Vec<Result<()>> {
        let results = self.add_all(fences).await;
        let restored = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!(restored, failed = results.len() - restored, "Restored fences");
        results
    }

    /// Register a transition listener.
    pub fn subscribe(&self, callback: TransitionCallback) -> Result<Subscription> {
        self.dispatcher.subscribe(callback)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
