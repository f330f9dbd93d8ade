//! Supervisor error taxonomy. Every variant is recovered at the control API
//! boundary and reported as `{"status": "error", "message": ...}`.

use super::state_machine::TransitionError;

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("{0} is already running or starting")]
    AlreadyActive(String),

    #[error("{0} is not running")]
    NotActive(String),

    #[error("{id} failed to launch: {reason}")]
    LaunchFailure { id: String, reason: String },

    #[error("{id} did not exit within {timeout_secs}s and was force-killed")]
    StopTimeout { id: String, timeout_secs: u64 },

    #[error("{0} cannot start: controller is shutting down")]
    ShuttingDown(String),

    #[error("unknown instance '{0}'")]
    InvalidInstance(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Internal(String),
}

impl SupervisorError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyActive(_) => "ALREADY_ACTIVE",
            Self::NotActive(_) => "NOT_ACTIVE",
            Self::LaunchFailure { .. } => "LAUNCH_FAILURE",
            Self::StopTimeout { .. } => "STOP_TIMEOUT",
            Self::ShuttingDown(_) => "SHUTTING_DOWN",
            Self::InvalidInstance(_) => "INVALID_INSTANCE",
            Self::Transition(_) => "INVALID_TRANSITION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
