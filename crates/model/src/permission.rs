//! Location permission state.

use serde::{Deserialize, Serialize};

/// Location permission as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionState {
    /// No decision has been made yet.
    #[default]
    Undetermined,
    Denied,
    /// Granted while the app is in the foreground.
    GrantedForeground,
    /// Granted including background delivery.
    GrantedAlways,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::GrantedForeground | Self::GrantedAlways)
    }

    /// Background transitions are only delivered with `GrantedAlways`.
    pub fn allows_background(&self) -> bool {
        matches!(self, Self::GrantedAlways)
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, Self::Undetermined)
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Undetermined => "undetermined",
            Self::Denied => "denied",
            Self::GrantedForeground => "granted_foreground",
            Self::GrantedAlways => "granted_always",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_states() {
        assert!(!PermissionState::Undetermined.is_granted());
        assert!(!PermissionState::Denied.is_granted());
        assert!(PermissionState::GrantedForeground.is_granted());
        assert!(!PermissionState::GrantedForeground.allows_background());
        assert!(PermissionState::GrantedAlways.allows_background());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&PermissionState::GrantedAlways).unwrap();
        assert_eq!(json, "\"GRANTED_ALWAYS\"");
    }
}
