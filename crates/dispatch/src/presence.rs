//! Per-fence presence tracking used to flag platform anomalies.
//!
//! ```text
//! OUTSIDE --ENTER--> INSIDE --EXIT--> OUTSIDE
//!                    INSIDE --DWELL-> INSIDE
//! ```
//!
//! Any other combination is an anomaly. Anomalous events are still
//! delivered: the host engine owns ground truth.

use geofence_model::{TransitionEvent, TransitionType};
use std::collections::HashSet;

/// Where the device is relative to a fence, as far as delivered events tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Outside,
    Inside,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outside => f.write_str("OUTSIDE"),
            Self::Inside => f.write_str("INSIDE"),
        }
    }
}

/// An event that does not fit the presence state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceAnomaly {
    pub fence_id: String,
    pub kind: TransitionType,
    pub presence: Presence,
}

impl std::fmt::Display for PresenceAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} received for fence '{}' while already {}",
            self.kind, self.fence_id, self.presence
        )
    }
}

/// Tracks which fences the device is inside. Unknown fences are OUTSIDE.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    inside: HashSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presence(&self, fence_id: &str) -> Presence {
        if self.inside.contains(fence_id) {
            Presence::Inside
        } else {
            Presence::Outside
        }
    }

    /// Apply `event` and report whether it was anomalous.
    pub fn observe(&mut self, event: &TransitionEvent) -> Option<PresenceAnomaly> {
        let presence = self.presence(&event.fence_id);
        let anomalous = matches!(
            (event.kind, presence),
            (TransitionType::Enter, Presence::Inside)
                | (TransitionType::Exit, Presence::Outside)
                | (TransitionType::Dwell, Presence::Outside)
        );

        match event.kind {
            TransitionType::Enter | TransitionType::Dwell => {
                self.inside.insert(event.fence_id.clone());
            }
            TransitionType::Exit => {
                self.inside.remove(&event.fence_id);
            }
        }

        anomalous.then(|| PresenceAnomaly {
            fence_id: event.fence_id.clone(),
            kind: event.kind,
            presence,
        })
    }

    pub fn forget(&mut self, fence_id: &str) {
        self.inside.remove(fence_id);
    }

    pub fn clear(&mut self) {
        self.inside.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn observe(tracker: &mut PresenceTracker, kind: TransitionType) -> Option<PresenceAnomaly> {
        tracker.observe(&TransitionEvent::new("a", kind, Utc::now()))
    }

    #[test]
    fn test_regular_cycle_has_no_anomalies() {
        let mut tracker = PresenceTracker::new();
        assert!(observe(&mut tracker, TransitionType::Enter).is_none());
        assert!(observe(&mut tracker, TransitionType::Dwell).is_none());
        assert_eq!(tracker.presence("a"), Presence::Inside);
        assert!(observe(&mut tracker, TransitionType::Exit).is_none());
        assert_eq!(tracker.presence("a"), Presence::Outside);
    }

    #[test]
    fn test_exit_while_outside_is_anomaly() {
        let mut tracker = PresenceTracker::new();
        let anomaly = observe(&mut tracker, TransitionType::Exit).unwrap();
        assert_eq!(anomaly.presence, Presence::Outside);
        assert_eq!(
            anomaly.to_string(),
            "EXIT received for fence 'a' while already OUTSIDE"
        );
    }

    #[test]
    fn test_double_enter_is_anomaly() {
        let mut tracker = PresenceTracker::new();
        observe(&mut tracker, TransitionType::Enter);
        assert!(observe(&mut tracker, TransitionType::Enter).is_some());
    }

    #[test]
    fn test_dwell_while_outside_is_anomaly_and_moves_inside() {
        let mut tracker = PresenceTracker::new();
        assert!(observe(&mut tracker, TransitionType::Dwell).is_some());
        assert_eq!(tracker.presence("a"), Presence::Inside);
    }

    #[test]
    fn test_forget_resets_to_outside() {
        let mut tracker = PresenceTracker::new();
        observe(&mut tracker, TransitionType::Enter);
        tracker.forget("a");
        assert!(observe(&mut tracker, TransitionType::Enter).is_none());
    }
}
