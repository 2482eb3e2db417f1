//! Activity Lifecycle
//!
//! Explicit state machine for the viewer activity. The surrounding
//! application drives it; nothing here touches the window or the relay.
//!
//! ```text
//! Created ──configure──► Configured ──start──► Running ◄──deactivate── Activated
//!                                                 └────────activate────────►┘
//! (any state but Stopped) ──stop──► Stopped
//! ```

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    /// Constructed, nothing registered yet.
    #[default]
    Created,
    /// Channels registered, not yet serving.
    Configured,
    /// Serving clients with the window hidden.
    Running,
    /// Serving clients with the window visible.
    Activated,
    /// Shut down. Terminal.
    Stopped,
}

impl ActivityState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Activated => "activated",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the activity is serving clients.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        matches!(self, Self::Running | Self::Activated)
    }

    /// Compute the state reached by applying `op`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when `op` is not allowed
    /// from this state.
    pub const fn apply(self, op: LifecycleOp) -> Result<Self, LifecycleError> {
        match (self, op) {
            (Self::Created, LifecycleOp::Configure) => Ok(Self::Configured),
            (Self::Configured, LifecycleOp::Start) => Ok(Self::Running),
            (Self::Running, LifecycleOp::Activate) => Ok(Self::Activated),
            (Self::Activated, LifecycleOp::Deactivate) => Ok(Self::Running),
            (Self::Stopped, LifecycleOp::Stop) => Err(LifecycleError::InvalidTransition {
                from: self,
                op,
            }),
            (_, LifecycleOp::Stop) => Ok(Self::Stopped),
            (from, op) => Err(LifecycleError::InvalidTransition { from, op }),
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation requested on the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    /// Register channels and reset cached state.
    Configure,
    /// Begin serving with the window hidden.
    Start,
    /// Show the window.
    Activate,
    /// Hide the window.
    Deactivate,
    /// Shut down.
    Stop,
}

impl LifecycleOp {
    /// Parse an operation name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "configure" => Some(Self::Configure),
            "start" => Some(Self::Start),
            "activate" => Some(Self::Activate),
            "deactivate" => Some(Self::Deactivate),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    /// Get the operation name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Start => "start",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The operation is not allowed from the current state.
    #[error("cannot {op} while {from}")]
    InvalidTransition {
        /// State the operation was attempted from.
        from: ActivityState,
        /// The rejected operation.
        op: LifecycleOp,
    },
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ActivityState::Created, LifecycleOp::Configure, ActivityState::Configured)]
    #[test_case(ActivityState::Configured, LifecycleOp::Start, ActivityState::Running)]
    #[test_case(ActivityState::Running, LifecycleOp::Activate, ActivityState::Activated)]
    #[test_case(ActivityState::Activated, LifecycleOp::Deactivate, ActivityState::Running)]
    #[test_case(ActivityState::Created, LifecycleOp::Stop, ActivityState::Stopped)]
    #[test_case(ActivityState::Running, LifecycleOp::Stop, ActivityState::Stopped)]
    #[test_case(ActivityState::Activated, LifecycleOp::Stop, ActivityState::Stopped)]
    fn valid_transitions(from: ActivityState, op: LifecycleOp, to: ActivityState) {
        assert_eq!(from.apply(op), Ok(to));
    }

    #[test_case(ActivityState::Created, LifecycleOp::Start)]
    #[test_case(ActivityState::Created, LifecycleOp::Activate)]
    #[test_case(ActivityState::Configured, LifecycleOp::Configure)]
    #[test_case(ActivityState::Running, LifecycleOp::Deactivate)]
    #[test_case(ActivityState::Activated, LifecycleOp::Activate)]
    #[test_case(ActivityState::Stopped, LifecycleOp::Start)]
    #[test_case(ActivityState::Stopped, LifecycleOp::Stop)]
    fn invalid_transitions(from: ActivityState, op: LifecycleOp) {
        assert_eq!(
            from.apply(op),
            Err(LifecycleError::InvalidTransition { from, op })
        );
    }

    #[test]
    fn serving_states() {
        assert!(ActivityState::Running.is_serving());
        assert!(ActivityState::Activated.is_serving());
        assert!(!ActivityState::Configured.is_serving());
        assert!(!ActivityState::Stopped.is_serving());
    }

    #[test]
    fn op_parsing() {
        assert_eq!(LifecycleOp::parse("ACTIVATE"), Some(LifecycleOp::Activate));
        assert_eq!(LifecycleOp::parse("deactivate"), Some(LifecycleOp::Deactivate));
        assert_eq!(LifecycleOp::parse("launch"), None);
    }

    #[test]
    fn error_message_names_state_and_op() {
        let err = ActivityState::Stopped.apply(LifecycleOp::Activate).unwrap_err();
        assert_eq!(err.to_string(), "cannot activate while stopped");
    }
}
