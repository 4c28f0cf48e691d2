//! In-memory host that detects crossings from scripted positions.

use crate::{CapabilityProvider, NotificationOptions, ProviderEvent};
use async_trait::async_trait;
use chrono::Utc;
use geofence_model::{
    Coordinate, Fence, PermissionState, ProviderError, ProviderStatus, RawTransition,
    TransitionType,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

/// Host limit on simultaneously registered fences.
pub const DEFAULT_FENCE_LIMIT: usize = 100;

/// Capacity of the push stream before events are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct SimState {
    monitored: BTreeMap<String, Fence>,
    inside: BTreeSet<String>,
    position: Option<Coordinate>,
    permission: PermissionState,
    notification: Option<NotificationOptions>,
    failures: VecDeque<ProviderError>,
}

/// Simulated host geofencing engine.
///
/// Fences are checked against the last position given to
/// [`move_to`](Self::move_to); crossings are batched per transition type
/// and pushed like a real host would. Permission prompts either answer
/// immediately ([`auto_answer`](Self::auto_answer)) or wait for
/// [`answer_prompt`](Self::answer_prompt).
pub struct SimulatedProvider {
    state: Mutex<SimState>,
    tx: mpsc::Sender<ProviderEvent>,
    rx: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
    counting: bool,
    limit: usize,
    auto_answer: Option<PermissionState>,
    answer: watch::Sender<Option<PermissionState>>,
    prompts: AtomicUsize,
    begin_calls: AtomicUsize,
    dropped_events: AtomicUsize,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (answer, _) = watch::channel(None);
        Self {
            state: Mutex::new(SimState::default()),
            tx,
            rx: Mutex::new(Some(rx)),
            counting: true,
            limit: DEFAULT_FENCE_LIMIT,
            auto_answer: None,
            answer,
            prompts: AtomicUsize::new(0),
            begin_calls: AtomicUsize::new(0),
            dropped_events: AtomicUsize::new(0),
        }
    }

    /// Behave like a host that cannot report an exact count.
    pub fn without_counting(mut self) -> Self {
        self.counting = false;
        self
    }

    pub fn with_fence_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        self.state().permission = permission;
        self
    }

    /// Answer every permission prompt immediately with `answer`.
    pub fn auto_answer(mut self, answer: PermissionState) -> Self {
        self.auto_answer = Some(answer);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the pending permission prompt.
    pub fn answer_prompt(&self, answer: PermissionState) {
        self.answer.send_replace(Some(answer));
    }

    /// Number of OS prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of `begin_monitoring` calls received, successful or not.
    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    /// Reports pushed but not yet taken off the stream.
    pub fn pending_events(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Fail the next monitoring call (begin or stop) with `error`.
    pub fn fail_next(&self, error: ProviderError) {
        self.state().failures.push_back(error);
    }

    pub fn monitored_ids(&self) -> Vec<String> {
        self.state().monitored.keys().cloned().collect()
    }

    pub fn monitored(&self, id: &str) -> Option<Fence> {
        self.state().monitored.get(id).cloned()
    }

    pub fn notification_options(&self) -> Option<NotificationOptions> {
        self.state().notification.clone()
    }

    /// Change the permission outside the app, as a user would in settings.
    pub fn change_permission(&self, permission: PermissionState) {
        self.state().permission = permission;
        self.push(ProviderEvent::PermissionChanged(permission));
    }

    /// Push a raw transition as if the host engine had detected it.
    pub fn emit(&self, raw: RawTransition) {
        self.push(ProviderEvent::Transition(raw));
    }

    /// Move the device and push every ENTER/EXIT crossing this causes.
    pub fn move_to(&self, position: Coordinate) {
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        {
            let mut state = self.state();
            state.position = Some(position);

            let SimState {
                monitored, inside, ..
            } = &mut *state;
            for (id, fence) in monitored.iter() {
                let now_inside = fence.contains(&position);
                let was_inside = inside.contains(id);
                if now_inside && !was_inside {
                    inside.insert(id.clone());
                    if fence.transition_mask.contains(TransitionType::Enter) {
                        entered.push(id.clone());
                    }
                } else if !now_inside && was_inside {
                    inside.remove(id);
                    if fence.transition_mask.contains(TransitionType::Exit) {
                        exited.push(id.clone());
                    }
                }
            }
        }

        self.push_batch(TransitionType::Exit, exited, position);
        self.push_batch(TransitionType::Enter, entered, position);
    }

    fn push_batch(&self, kind: TransitionType, ids: Vec<String>, position: Coordinate) {
        if ids.is_empty() {
            return;
        }
        let mut raw = RawTransition::new(kind, ids, Utc::now());
        raw.location = Some(position);
        self.emit(raw);
    }

    fn push(&self, event: ProviderEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, "Provider event stream full, dropping events");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Provider event stream closed");
            }
        }
    }
}

#[async_trait]
impl CapabilityProvider for SimulatedProvider {
    fn supports_counting(&self) -> bool {
        self.counting
    }

    async fn begin_monitoring(&self, fence: &Fence) -> Result<(), ProviderError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);

        let initial_enter = {
            let mut state = self.state();
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            if !state.permission.is_granted() {
                return Err(ProviderError::new(
                    ProviderStatus::PermissionDenied,
                    "location permission not granted",
                ));
            }
            let replacing = state.monitored.contains_key(&fence.id);
            if !replacing && state.monitored.len() >= self.limit {
                return Err(ProviderError::new(
                    ProviderStatus::TooManyFences,
                    format!("host limit of {} fences reached", self.limit),
                ));
            }

            state.monitored.insert(fence.id.clone(), fence.clone());
            state.inside.remove(&fence.id);

            // Initial trigger: a fence registered around the device enters immediately.
            match state.position {
                Some(position) if fence.contains(&position) => {
                    state.inside.insert(fence.id.clone());
                    fence
                        .transition_mask
                        .contains(TransitionType::Enter)
                        .then_some(position)
                }
                _ => None,
            }
        };

        if let Some(position) = initial_enter {
            self.push_batch(TransitionType::Enter, vec![fence.id.clone()], position);
        }
        Ok(())
    }

    async fn stop_monitoring(&self, ids: &[String]) -> Result<(), ProviderError> {
        let mut state = self.state();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        for id in ids {
            state.monitored.remove(id);
            state.inside.remove(id);
        }
        Ok(())
    }

    fn current_permission_state(&self) -> PermissionState {
        self.state().permission
    }

    async fn request_permission(&self) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);

        let answer = match self.auto_answer {
            Some(answer) => answer,
            None => {
                let mut rx = self.answer.subscribe();
                let answer = rx
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|value| *value)
                    .unwrap_or(PermissionState::Denied);
                self.answer.send_replace(None);
                answer
            }
        };

        self.state().permission = answer;
        answer
    }

    async fn count(&self) -> Result<usize, ProviderError> {
        Ok(self.state().monitored.len())
    }

    async fn configure(&self, options: &NotificationOptions) -> Result<(), ProviderError> {
        self.state().notification = Some(options.clone());
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
