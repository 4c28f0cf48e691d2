//! Suppression of repeated `(fence, transition)` reports within a window.

use chrono::{DateTime, Utc};
use geofence_model::{TransitionEvent, TransitionType};
use std::collections::HashMap;
use std::time::Duration;

/// Entries kept before stale keys are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Remembers when each `(fence, transition)` pair was last admitted.
///
/// Timestamps come from the events themselves, so coalescing is
/// independent of how fast the pump drains the stream. A zero window
/// admits everything and remembers nothing.
#[derive(Debug, Default)]
pub struct Coalescer {
    window: Duration,
    last: HashMap<(String, TransitionType), DateTime<Utc>>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
        self.last.clear();
    }

    /// Returns false if `event` repeats an admitted one within the window.
    pub fn admit(&mut self, event: &TransitionEvent) -> bool {
        if self.window.is_zero() {
            return true;
        }

        let key = (event.fence_id.clone(), event.kind);
        if let Some(prev) = self.last.get(&key) {
            // Out-of-order timestamps fail `to_std` and count as distinct.
            if let Ok(elapsed) = (event.timestamp - *prev).to_std() {
                if elapsed < self.window {
                    return false;
                }
            }
        }

        if self.last.len() >= PRUNE_THRESHOLD {
            self.prune(event.timestamp);
        }
        self.last.insert(key, event.timestamp);
        true
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.last.retain(|_, seen| match (now - *seen).to_std() {
            Ok(age) => age < window,
            Err(_) => true,
        });
    }

    pub fn forget(&mut self, fence_id: &str) {
        self.last.retain(|(id, _), _| id != fence_id);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}
