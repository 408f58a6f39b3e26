use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ProjectNotFound,
    InvalidConfig,
    NotRunning,
    AlreadyRunning,
    ApprovalNotFound,
    InvalidTransition,
    UnsupportedRefactoring,
    WatchError,
    IoError,
    InvalidRequest,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectNotFound => write!(f, "PROJECT_NOT_FOUND"),
            Self::InvalidConfig => write!(f, "INVALID_CONFIG"),
            Self::NotRunning => write!(f, "NOT_RUNNING"),
            Self::AlreadyRunning => write!(f, "ALREADY_RUNNING"),
            Self::ApprovalNotFound => write!(f, "APPROVAL_NOT_FOUND"),
            Self::InvalidTransition => write!(f, "INVALID_TRANSITION"),
            Self::UnsupportedRefactoring => write!(f, "UNSUPPORTED_REFACTORING"),
            Self::WatchError => write!(f, "WATCH_ERROR"),
            Self::IoError => write!(f, "IO_ERROR"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContextError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn project_not_found(path: &str) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project root not readable: {path}"),
        )
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    pub fn not_running() -> Self {
        Self::new(ErrorCode::NotRunning, "Orchestrator is not running")
    }

    pub fn approval_not_found(id: &str) -> Self {
        Self::new(
            ErrorCode::ApprovalNotFound,
            format!("No approval request with id {id}"),
        )
    }
}
