//! Transition dispatcher: normalize, de-duplicate, fan out.

use crate::coalesce::Coalescer;
use crate::listener::{ListenerSlot, Subscription, TransitionCallback};
use crate::presence::{Presence, PresenceTracker};
use crate::stats::{DispatchCounts, DispatchStats};
use geofence_model::{GeofenceError, RawTransition, Result, TransitionEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Removed fences remembered before the oldest is dropped.
const RETIRED_LIMIT: usize = 1024;

/// Coalescing, presence and removal state, consulted once per event.
#[derive(Debug, Default)]
struct Pipeline {
    coalescer: Coalescer,
    presence: PresenceTracker,
    /// When each fence left the registry.
    retired: HashMap<String, DateTime<Utc>>,
}

impl Pipeline {
    fn forget(&mut self, fence_id: &str) {
        self.presence.forget(fence_id);
        self.coalescer.forget(fence_id);
    }

    fn retire(&mut self, fence_id: &str, at: DateTime<Utc>) {
        self.forget(fence_id);
        if self.retired.len() >= RETIRED_LIMIT && !self.retired.contains_key(fence_id) {
            let oldest = self
                .retired
                .iter()
                .min_by_key(|(_, removed)| **removed)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.retired.remove(&oldest);
            }
        }
        self.retired.insert(fence_id.to_string(), at);
    }

    /// True if the event happened after its fence was removed.
    fn is_stale(&self, event: &TransitionEvent) -> bool {
        self.retired
            .get(&event.fence_id)
            .is_some_and(|removed| event.timestamp > *removed)
    }
}

pub(crate) struct DispatcherInner {
    listeners: Mutex<Vec<Arc<ListenerSlot>>>,
    pipeline: Mutex<Pipeline>,
    /// Serializes fan-out so every listener sees events in arrival order.
    delivery: Mutex<()>,
    next_listener: AtomicU64,
    closed: AtomicBool,
    stats: DispatchStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatcherInner {
    pub(crate) fn remove_listener(&self, id: u64) {
        lock(&self.listeners).retain(|slot| slot.id != id);
    }
}

/// Delivers transitions to every subscribed listener, in subscription
/// order, one event at a time.
///
/// Cloning is cheap; clones share listeners and state. Callbacks must not
/// dispatch events themselves.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher with a zero (pass-through) coalescing window.
    pub fn new() -> Self {
        Self::with_window(Duration::ZERO)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: Mutex::new(Vec::new()),
                pipeline: Mutex::new(Pipeline {
                    coalescer: Coalescer::new(window),
                    presence: PresenceTracker::new(),
                    retired: HashMap::new(),
                }),
                delivery: Mutex::new(()),
                next_listener: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                stats: DispatchStats::default(),
            }),
        }
    }

    pub fn coalescing_window(&self) -> Duration {
        lock(&self.inner.pipeline).coalescer.window()
    }

    pub fn set_coalescing_window(&self, window: Duration) {
        lock(&self.inner.pipeline).coalescer.set_window(window);
        tracing::debug!(window_ms = window.as_millis() as u64, "Coalescing window set");
    }

    /// Register a listener.
    ///
    /// A listener added while an event is being delivered starts with the
    /// next event. Fails with `InvalidCallback` once the dispatcher is closed.
    pub fn subscribe(&self, callback: TransitionCallback) -> Result<Subscription> {
        if self.is_closed() {
            return Err(GeofenceError::InvalidCallback(
                "dispatcher is shut down; the listener would never be invoked".to_string(),
            ));
        }

        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ListenerSlot::new(id, callback));
        lock(&self.inner.listeners).push(Arc::clone(&slot));
        tracing::debug!(listener = id, "Listener subscribed");

        Ok(Subscription::new(slot, Arc::downgrade(&self.inner)))
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Normalize a host report and deliver each resulting event.
    ///
    /// Returns the number of events that passed de-duplication.
    pub fn dispatch_raw(&self, raw: RawTransition) -> usize {
        let code = raw.code;
        match raw.into_events() {
            Ok(events) => self.dispatch_all(events),
            Err(err) => {
                self.inner.stats.record_undecodable();
                tracing::error!(code, error = %err, "Dropping undecodable transition report");
                0
            }
        }
    }

    /// Deliver one normalized event. Returns false if it was coalesced.
    pub fn dispatch(&self, event: TransitionEvent) -> bool {
        self.dispatch_all(vec![event]) == 1
    }

    fn dispatch_all(&self, events: Vec<TransitionEvent>) -> usize {
        self.inner.stats.record_received(events.len() as u64);

        let _order = lock(&self.inner.delivery);
        let admitted: Vec<TransitionEvent> = {
            let mut pipeline = lock(&self.inner.pipeline);
            events
                .into_iter()
                .filter(|event| self.admit(&mut pipeline, event))
                .collect()
        };

        for event in &admitted {
            self.fan_out(event);
        }
        admitted.len()
    }

    fn admit(&self, pipeline: &mut Pipeline, event: &TransitionEvent) -> bool {
        if pipeline.is_stale(event) {
            self.inner.stats.record_stale();
            tracing::debug!(
                fence_id = %event.fence_id,
                transition = %event.kind,
                "Dropping transition for removed fence"
            );
            return false;
        }

        if !pipeline.coalescer.admit(event) {
            self.inner.stats.record_coalesced();
            tracing::debug!(
                fence_id = %event.fence_id,
                transition = %event.kind,
                "Coalesced duplicate transition"
            );
            return false;
        }

        if let Some(anomaly) = pipeline.presence.observe(event) {
            self.inner.stats.record_anomaly();
            tracing::warn!(
                fence_id = %anomaly.fence_id,
                transition = %anomaly.kind,
                presence = %anomaly.presence,
                "Transition contradicts tracked presence; delivering anyway"
            );
        }
        true
    }

    fn fan_out(&self, event: &TransitionEvent) {
        // Snapshot so listeners added mid-delivery wait for the next event.
        let listeners: Vec<Arc<ListenerSlot>> = lock(&self.inner.listeners).clone();
        for slot in &listeners {
            slot.deliver(event, &self.inner.stats);
        }
    }

    pub fn presence(&self, fence_id: &str) -> Presence {
        lock(&self.inner.pipeline).presence.presence(fence_id)
    }

    /// Drop presence and coalescing memory for a replaced fence.
    pub fn forget(&self, fence_id: &str) {
        lock(&self.inner.pipeline).forget(fence_id);
    }

    pub fn forget_all(&self) {
        let mut pipeline = lock(&self.inner.pipeline);
        pipeline.presence.clear();
        pipeline.coalescer.clear();
    }

    /// Mark a fence as removed at `at`. Events for it timestamped later are
    /// dropped until it is [`activate`](Self::activate)d again.
    pub fn retire(&self, fence_id: &str, at: DateTime<Utc>) {
        lock(&self.inner.pipeline).retire(fence_id, at);
    }

    /// Clear the removal mark for a fence that was registered (again).
    pub fn activate(&self, fence_id: &str) {
        lock(&self.inner.pipeline).retired.remove(fence_id);
    }

    pub fn stats(&self) -> DispatchCounts {
        self.inner.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Release every listener and refuse new ones until [`reopen`](Self::reopen).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let listeners = std::mem::take(&mut *lock(&self.inner.listeners));
        for slot in &listeners {
            slot.release();
        }
        self.forget_all();
        tracing::debug!(released = listeners.len(), "Dispatcher closed");
    }

    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::new_callback;
    use chrono::{TimeDelta, Utc};
    use geofence_model::TransitionType;

    type Log = Arc<Mutex<Vec<(String, TransitionType)>>>;

    fn recorder(log: &Log, tag: &str) -> TransitionCallback {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        new_callback(move |event| {
            log.lock()
                .unwrap()
                .push((format!("{tag}:{}", event.fence_id), event.kind));
        })
    }

    fn enter(id: &str) -> TransitionEvent {
        TransitionEvent::new(id, TransitionType::Enter, Utc::now())
    }

    #[test]
    fn test_listeners_receive_in_subscription_order() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let _l1 = dispatcher.subscribe(recorder(&log, "l1")).unwrap();
        let _l2 = dispatcher.subscribe(recorder(&log, "l2")).unwrap();

        dispatcher.dispatch(enter("a"));

        let seen: Vec<_> = log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect();
        assert_eq!(seen, vec!["l1:a", "l2:a"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let _bad = dispatcher
            .subscribe(new_callback(|_| panic!("listener bug")))
            .unwrap();
        let _good = dispatcher.subscribe(recorder(&log, "good")).unwrap();

        dispatcher.dispatch(enter("a"));
        dispatcher.dispatch(TransitionEvent::new("a", TransitionType::Exit, Utc::now()));

        assert_eq!(log.lock().unwrap().len(), 2);
        let stats = dispatcher.stats();
        assert_eq!(stats.listener_panics, 2);
        assert_eq!(stats.delivered, 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let sub = dispatcher.subscribe(recorder(&log, "l1")).unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(dispatcher.listener_count(), 0);

        dispatcher.dispatch(enter("a"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Default::default();

        let sub = {
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            dispatcher
                .subscribe(new_callback(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(sub) = slot.lock().unwrap().as_ref() {
                        sub.unsubscribe();
                    }
                }))
                .unwrap()
        };
        *slot.lock().unwrap() = Some(sub);

        dispatcher.dispatch(enter("a"));
        dispatcher.dispatch(TransitionEvent::new("a", TransitionType::Exit, Utc::now()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight_delivery() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let sub = {
            let calls = Arc::clone(&calls);
            let finished = Arc::clone(&finished);
            let entered_tx = Mutex::new(entered_tx);
            dispatcher
                .subscribe(new_callback(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = entered_tx.lock().unwrap().send(());
                    std::thread::sleep(Duration::from_millis(100));
                    finished.store(true, Ordering::SeqCst);
                }))
                .unwrap()
        };

        let worker = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || {
                dispatcher.dispatch(enter("a"));
            })
        };

        entered_rx.recv().unwrap();
        sub.unsubscribe();
        assert!(finished.load(Ordering::SeqCst));

        worker.join().unwrap();
        dispatcher.dispatch(TransitionEvent::new("a", TransitionType::Exit, Utc::now()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_delivery_starts_with_next_event() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let late: Arc<Mutex<Vec<Subscription>>> = Default::default();

        let _adder = {
            let handle = dispatcher.clone();
            let log = Arc::clone(&log);
            let late = Arc::clone(&late);
            dispatcher.subscribe(new_callback(move |_| {
                let mut late = late.lock().unwrap();
                if late.is_empty() {
                    late.push(handle.subscribe(recorder(&log, "late")).unwrap());
                }
            }))
        }
        .unwrap();

        dispatcher.dispatch(enter("a"));
        assert!(log.lock().unwrap().is_empty());

        dispatcher.dispatch(TransitionEvent::new("a", TransitionType::Exit, Utc::now()));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[("late:a".to_string(), TransitionType::Exit)]
        );
    }

    #[test]
    fn test_raw_report_fans_out_per_fence() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let _l = dispatcher.subscribe(recorder(&log, "l")).unwrap();

        let delivered = dispatcher.dispatch_raw(RawTransition::new(
            TransitionType::Enter,
            vec!["a".into(), "b".into()],
            Utc::now(),
        ));

        assert_eq!(delivered, 2);
        let seen: Vec<_> = log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect();
        assert_eq!(seen, vec!["l:a", "l:b"]);
    }

    #[test]
    fn test_undecodable_report_is_dropped() {
        let dispatcher = Dispatcher::new();
        let raw = RawTransition {
            code: 8,
            fence_ids: vec!["a".into()],
            timestamp: Utc::now(),
            location: None,
        };
        assert_eq!(dispatcher.dispatch_raw(raw), 0);
        assert_eq!(dispatcher.stats().undecodable, 1);
    }

    #[test]
    fn test_coalescing_window_applies_to_raw_reports() {
        let dispatcher = Dispatcher::with_window(Duration::from_millis(250));
        let log: Log = Default::default();
        let _l = dispatcher.subscribe(recorder(&log, "l")).unwrap();
        let ts = Utc::now();

        for offset in [0, 100, 300] {
            dispatcher.dispatch_raw(RawTransition::new(
                TransitionType::Enter,
                vec!["a".into()],
                ts + TimeDelta::milliseconds(offset),
            ));
        }

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.stats().coalesced, 1);
    }

    #[test]
    fn test_anomalies_are_delivered_and_counted() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let _l = dispatcher.subscribe(recorder(&log, "l")).unwrap();

        dispatcher.dispatch(TransitionEvent::new("a", TransitionType::Exit, Utc::now()));

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.stats().anomalies, 1);
    }

    #[test]
    fn test_forget_resets_presence() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(enter("a"));
        assert_eq!(dispatcher.presence("a"), Presence::Inside);

        dispatcher.forget("a");
        assert_eq!(dispatcher.presence("a"), Presence::Outside);
        dispatcher.dispatch(enter("a"));
        assert_eq!(dispatcher.stats().anomalies, 0);
    }

    #[test]
    fn test_closed_dispatcher_rejects_subscriptions() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let sub = dispatcher.subscribe(recorder(&log, "l")).unwrap();

        dispatcher.close();
        assert!(!sub.is_active());
        assert!(matches!(
            dispatcher.subscribe(recorder(&log, "l2")),
            Err(GeofenceError::InvalidCallback(_))
        ));

        dispatcher.reopen();
        assert!(dispatcher.subscribe(recorder(&log, "l3")).is_ok());
    }

    #[test]
    fn test_events_after_removal_are_dropped() {
        let dispatcher = Dispatcher::new();
        let log: Log = Default::default();
        let _l = dispatcher.subscribe(recorder(&log, "l")).unwrap();
        let removed_at = Utc::now();

        dispatcher.retire("a", removed_at);

        // Happened before the removal: still in flight, still delivered.
        let earlier =
            TransitionEvent::new("a", TransitionType::Exit, removed_at - TimeDelta::seconds(1));
        assert!(dispatcher.dispatch(earlier));

        let later =
            TransitionEvent::new("a", TransitionType::Enter, removed_at + TimeDelta::seconds(1));
        assert!(!dispatcher.dispatch(later.clone()));
        assert_eq!(dispatcher.stats().stale, 1);
        assert_eq!(log.lock().unwrap().len(), 1);

        dispatcher.activate("a");
        assert!(dispatcher.dispatch(later));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_retire_resets_presence() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(enter("a"));
        assert_eq!(dispatcher.presence("a"), Presence::Inside);

        dispatcher.retire("a", Utc::now());
        assert_eq!(dispatcher.presence("a"), Presence::Outside);
    }
}
