//! Scenario files: fences to register and the steps to play against them.

use anyhow::{Context, Result};
use geofence_model::{Fence, GeofenceError, PermissionState};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Answer given to the permission prompt.
    #[serde(default = "default_permission")]
    pub permission: PermissionState,
    #[serde(default)]
    pub fences: Vec<Fence>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_permission() -> PermissionState {
    PermissionState::GrantedAlways
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    /// Move the device; the host reports any crossings.
    MoveTo { latitude: f64, longitude: f64 },
    /// Push a raw host report directly (e.g. `code: 4` for DWELL).
    #[serde(rename_all = "camelCase")]
    Emit { code: i32, fence_ids: Vec<String> },
    /// Let delivery run for a while.
    Wait { ms: u64 },
    Add { fence: Fence },
    Remove { id: String },
    Clear,
    /// Revoke or grant permission from outside the app.
    SetPermission { permission: PermissionState },
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid scenario JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Every invalid fence in the scenario, including ones added by steps.
    pub fn validation_errors(&self) -> Vec<GeofenceError> {
        let added = self.steps.iter().filter_map(|step| match step {
            Step::Add { fence } => Some(fence),
            _ => None,
        });
        self.fences
            .iter()
            .chain(added)
            .filter_map(|fence| fence.validate().err())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMUTE: &str = r#"{
        "fences": [
            { "id": "home", "latitude": 41.3874, "longitude": 2.1686, "radius": 150 },
            { "id": "office", "latitude": 41.4036, "longitude": 2.1744 }
        ],
        "steps": [
            { "action": "moveTo", "latitude": 41.5, "longitude": 2.25 },
            { "action": "emit", "code": 4, "fenceIds": ["home"] },
            { "action": "wait", "ms": 20 },
            { "action": "setPermission", "permission": "DENIED" },
            { "action": "clear" }
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_json(COMMUTE).unwrap();
        assert_eq!(scenario.permission, PermissionState::GrantedAlways);
        assert_eq!(scenario.fences.len(), 2);
        assert_eq!(scenario.fences[1].radius, 50.0);
        assert_eq!(
            scenario.steps[1],
            Step::Emit {
                code: 4,
                fence_ids: vec!["home".into()]
            }
        );
        assert_eq!(scenario.steps[4], Step::Clear);
        assert_eq!(
            scenario.steps[0],
            Step::MoveTo {
                latitude: 41.5,
                longitude: 2.25
            }
        );
    }

    #[test]
    fn test_unknown_action_fails() {
        let err = Scenario::from_json(r#"{ "steps": [{ "action": "teleport" }] }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_validation_covers_added_fences() {
        let scenario = Scenario::from_json(
            r#"{
                "fences": [{ "id": "ok", "latitude": 0, "longitude": 0 }],
                "steps": [{ "action": "add", "fence": { "id": "bad", "latitude": 0, "longitude": 200 } }]
            }"#,
        )
        .unwrap();

        let errors = scenario.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_invalid_fence());
    }
}
