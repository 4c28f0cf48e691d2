//! Dispatch counters, updated lock-free from the delivery path.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    delivered: AtomicU64,
    coalesced: AtomicU64,
    anomalies: AtomicU64,
    listener_panics: AtomicU64,
    undecodable: AtomicU64,
    stale: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn record_received(&self, events: u64) {
        self.received.fetch_add(events, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_undecodable(&self) {
        self.undecodable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCounts {
    /// Per-fence events after normalization.
    pub received: u64,
    /// Successful listener invocations.
    pub delivered: u64,
    /// Events suppressed by the coalescing window.
    pub coalesced: u64,
    /// Events that contradicted the presence state machine.
    pub anomalies: u64,
    pub listener_panics: u64,
    /// Raw reports with an unknown transition code.
    pub undecodable: u64,
    /// Events for fences removed before the event happened.
    pub stale: u64,
}
