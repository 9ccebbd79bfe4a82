//! Lifecycle state derivation.
//!
//! Status is never stored. It is recomputed from the cluster on every query,
//! with the last in-flight operation as the only local input.

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Creating,
    Running,
    Stopping,
    Stopped,
    Restarting,
    Deleting,
    Failed,
    NotFound,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Restarting => "restarting",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
        }
    }

    /// Running and Stopped are the only states no operation is driving towards.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a workspace whose deployment exists, from its replica counts.
pub fn derive_state(desired: i32, ready: i32, in_flight: Option<Operation>) -> LifecycleState {
    if desired > 0 && ready >= desired {
        LifecycleState::Running
    } else if desired == 0 && ready == 0 {
        LifecycleState::Stopped
    } else if desired == 0 {
        LifecycleState::Stopping
    } else if in_flight == Some(Operation::Restart) {
        LifecycleState::Restarting
    } else {
        LifecycleState::Creating
    }
}

/// State of a workspace whose namespace exists but whose deployment does not.
pub fn state_without_deployment(in_flight: Option<Operation>) -> LifecycleState {
    if in_flight == Some(Operation::Restart) {
        LifecycleState::Restarting
    } else {
        LifecycleState::Creating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_replicas_at_desired_is_running() {
        assert_eq!(derive_state(1, 1, None), LifecycleState::Running);
        assert_eq!(derive_state(2, 3, None), LifecycleState::Running);
    }

    #[test]
    fn scaled_to_zero_is_stopping_until_pods_drain() {
        assert_eq!(derive_state(0, 1, Some(Operation::Stop)), LifecycleState::Stopping);
        assert_eq!(derive_state(0, 0, Some(Operation::Stop)), LifecycleState::Stopped);
    }

    #[test]
    fn not_ready_depends_on_in_flight_operation() {
        assert_eq!(derive_state(1, 0, None), LifecycleState::Creating);
        assert_eq!(derive_state(1, 0, Some(Operation::Start)), LifecycleState::Creating);
        assert_eq!(
            derive_state(1, 0, Some(Operation::Restart)),
            LifecycleState::Restarting
        );
        assert_eq!(
            state_without_deployment(Some(Operation::Restart)),
            LifecycleState::Restarting
        );
        assert_eq!(state_without_deployment(None), LifecycleState::Creating);
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::NotFound).unwrap(),
            "\"not_found\""
        );
        assert_eq!(LifecycleState::NotFound.to_string(), "not_found");
    }
}
