//! The canonical set of registered fences.

use chrono::{DateTime, Utc};
use geofence_model::Fence;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) struct RegisteredFence {
    pub(crate) fence: Fence,
    pub(crate) registered_at: DateTime<Utc>,
}

impl RegisteredFence {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(expiration) = self.fence.expiration_duration else {
            return false;
        };
        // A deadline too far in the future to represent never arrives.
        chrono::TimeDelta::from_std(expiration)
            .ok()
            .and_then(|ttl| self.registered_at.checked_add_signed(ttl))
            .is_some_and(|deadline| deadline <= now)
    }
}

/// Fences keyed by id. Replacing an id is a single map insert, so the id
/// is never briefly absent.
#[derive(Debug, Default)]
pub(crate) struct FenceSet {
    fences: BTreeMap<String, RegisteredFence>,
}

impl FenceSet {
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.fences.contains_key(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Fence> {
        self.fences.get(id).map(|entry| &entry.fence)
    }

    /// Insert or replace. Returns true when an existing fence was replaced.
    pub(crate) fn insert(&mut self, fence: Fence, registered_at: DateTime<Utc>) -> bool {
        let id = fence.id.clone();
        self.fences
            .insert(
                id,
                RegisteredFence {
                    fence,
                    registered_at,
                },
            )
            .is_some()
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Fence> {
        self.fences.remove(id).map(|entry| entry.fence)
    }

    pub(crate) fn clear(&mut self) {
        self.fences.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.fences.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.fences.keys().cloned().collect()
    }

    /// Fences sorted by id.
    pub(crate) fn fences(&self) -> Vec<Fence> {
        self.fences.values().map(|entry| entry.fence.clone()).collect()
    }

    pub(crate) fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.fences
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
