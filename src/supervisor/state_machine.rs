use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical status of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    /// Starting or Running: a process handle is (or should be) attached.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {0} -> {1}")]
    InvalidTransition(InstanceStatus, InstanceStatus),
}

/// Legal edges of the instance lifecycle. Same-state moves are handled by
/// the caller as no-ops and are not listed here.
pub fn can_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
    use InstanceStatus::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Stopped)
            | (Running, Stopped)
            | (Error, Starting)
            | (Error, Stopped)
            | (_, Error)
    )
}

#[derive(Debug)]
pub struct StateMachine {
    pub state: InstanceStatus,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: InstanceStatus::Stopped }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(true)` if the state changed, `Ok(false)` for a same-state no-op.
    pub fn transition(&mut self, to: InstanceStatus) -> Result<bool, TransitionError> {
        if self.state == to {
            return Ok(false);
        }
        if can_transition(self.state, to) {
            tracing::debug!("State transition: {} -> {}", self.state, to);
            self.state = to;
            Ok(true)
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }
}
