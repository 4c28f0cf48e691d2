//! Transition kinds, masks and the events that carry them.

use crate::fence::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionType {
    Enter,
    Exit,
    Dwell,
}

/// A host transition code that does not name a known transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown transition code {0}")]
pub struct UnknownTransition(pub i32);

impl TransitionType {
    /// Every transition type, in code order.
    pub const ALL: [TransitionType; 3] = [Self::Enter, Self::Exit, Self::Dwell];

    /// Decode the host engine's transition code.
    pub fn from_code(code: i32) -> Result<Self, UnknownTransition> {
        match code {
            1 => Ok(Self::Enter),
            2 => Ok(Self::Exit),
            4 => Ok(Self::Dwell),
            other => Err(UnknownTransition(other)),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Enter => 1,
            Self::Exit => 2,
            Self::Dwell => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "ENTER",
            Self::Exit => "EXIT",
            Self::Dwell => "DWELL",
        }
    }
}

impl std::fmt::Display for TransitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of transitions a fence is monitored for.
///
/// Serialized as a list of transition names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<TransitionType>", from = "Vec<TransitionType>")]
pub struct TransitionMask(u8);

impl TransitionMask {
    pub const EMPTY: TransitionMask = TransitionMask(0);
    pub const ENTER_EXIT: TransitionMask = TransitionMask(1 | 2);
    pub const ALL: TransitionMask = TransitionMask(1 | 2 | 4);

    pub fn only(kind: TransitionType) -> Self {
        Self(kind.code() as u8)
    }

    pub fn with(mut self, kind: TransitionType) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: TransitionType) {
        self.0 |= kind.code() as u8;
    }

    pub fn contains(&self, kind: TransitionType) -> bool {
        self.0 & kind.code() as u8 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bitmask in host code form.
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = TransitionType> + '_ {
        TransitionType::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl Default for TransitionMask {
    fn default() -> Self {
        Self::ENTER_EXIT
    }
}

impl From<Vec<TransitionType>> for TransitionMask {
    fn from(kinds: Vec<TransitionType>) -> Self {
        kinds.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl From<TransitionMask> for Vec<TransitionType> {
    fn from(mask: TransitionMask) -> Self {
        mask.iter().collect()
    }
}

/// A crossing for one fence, as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub fence_id: String,
    #[serde(rename = "type")]
    pub kind: TransitionType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
}

impl TransitionEvent {
    pub fn new(fence_id: impl Into<String>, kind: TransitionType, timestamp: DateTime<Utc>) -> Self {
        Self {
            fence_id: fence_id.into(),
            kind,
            timestamp,
            location: None,
        }
    }

    pub fn at(mut self, location: Coordinate) -> Self {
        self.location = Some(location);
        self
    }
}

/// A transition as the host engine reports it: one code, every triggering fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransition {
    /// Host transition code (1 = enter, 2 = exit, 4 = dwell).
    pub code: i32,
    pub fence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
}

impl RawTransition {
    pub fn new(kind: TransitionType, fence_ids: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            code: kind.code(),
            fence_ids,
            timestamp,
            location: None,
        }
    }

    /// Split into one event per triggering fence, in reported order.
    pub fn into_events(self) -> Result<Vec<TransitionEvent>, UnknownTransition> {
        let kind = TransitionType::from_code(self.code)?;
        let location = self.location;
        let timestamp = self.timestamp;
        Ok(self
            .fence_ids
            .into_iter()
            .map(|fence_id| TransitionEvent {
                fence_id,
                kind,
                timestamp,
                location,
            })
            .collect())
    }
}
