//! Listener slots and the subscription handle that releases them.

use crate::dispatcher::DispatcherInner;
use crate::stats::DispatchStats;
use geofence_model::TransitionEvent;
use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback type for transition listeners.
pub type TransitionCallback = Arc<dyn Fn(&TransitionEvent) + Send + Sync + 'static>;

/// Wrap a closure as a [`TransitionCallback`].
pub fn new_callback<F>(f: F) -> TransitionCallback
where
    F: Fn(&TransitionEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

thread_local! {
    /// Listener whose callback is running on this thread, if any.
    static DELIVERING: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Marks this thread as inside a listener callback until dropped.
struct DeliveringGuard {
    previous: Option<u64>,
}

impl DeliveringGuard {
    fn enter(id: u64) -> Self {
        let previous = DELIVERING.with(|d| d.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.previous));
    }
}

fn delivering_on_this_thread(id: u64) -> bool {
    DELIVERING.with(|d| d.get() == Some(id))
}

pub(crate) struct ListenerSlot {
    pub(crate) id: u64,
    active: AtomicBool,
    /// Held for the duration of every callback invocation.
    gate: Mutex<()>,
    callback: TransitionCallback,
}

impl ListenerSlot {
    pub(crate) fn new(id: u64, callback: TransitionCallback) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
            callback,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Invoke the callback unless the slot was released. A panic inside the
    /// callback is caught here and never reaches the dispatcher.
    pub(crate) fn deliver(&self, event: &TransitionEvent, stats: &DispatchStats) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_active() {
            return;
        }

        let _delivering = DeliveringGuard::enter(self.id);
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(()) => stats.record_delivered(),
            Err(payload) => {
                stats.record_listener_panic();
                tracing::warn!(
                    listener = self.id,
                    fence_id = %event.fence_id,
                    transition = %event.kind,
                    panic = panic_message(payload.as_ref()),
                    "Listener panicked; continuing delivery"
                );
            }
        }
    }

    /// Deactivate and wait out any in-flight invocation.
    ///
    /// Returns false if the slot was already released. When called from
    /// inside this slot's own callback the wait is skipped: that
    /// invocation is the one in flight.
    pub(crate) fn release(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if !delivering_on_this_thread(self.id) {
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe). Once `unsubscribe` returns, the
/// callback is never invoked again.
#[must_use = "the handle is the only way to unsubscribe the listener"]
pub struct Subscription {
    slot: Arc<ListenerSlot>,
    dispatcher: Weak<DispatcherInner>,
}

impl Subscription {
    pub(crate) fn new(slot: Arc<ListenerSlot>, dispatcher: Weak<DispatcherInner>) -> Self {
        Self { slot, dispatcher }
    }

    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.slot.release() {
            return;
        }
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove_listener(self.slot.id);
        }
        tracing::debug!(listener = self.slot.id, "Listener unsubscribed");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id)
            .field("active", &self.slot.is_active())
            .finish()
    }
}
