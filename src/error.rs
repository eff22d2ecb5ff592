//! Error types for famtask
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, missing session)
//! - 3: Blocked by policy (role cannot perform the action)
//! - 4: Operation failed (storage error, corrupt data)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the famtask CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for famtask operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("No active session: {0}")]
    NoSession(String),

    // Policy blocks (exit code 3)
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::InvalidTask(_)
            | Error::TaskNotFound(_)
            | Error::ApprovalNotFound(_)
            | Error::NoSession(_) => exit_codes::USER_ERROR,

            Error::NotPermitted(_) => exit_codes::POLICY_BLOCKED,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::Repository(_)
            | Error::Scheduler(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Short machine-readable classification used in JSON output
    pub fn kind(&self) -> &'static str {
        match self.exit_code() {
            exit_codes::USER_ERROR => "user_error",
            exit_codes::POLICY_BLOCKED => "policy_blocked",
            _ => "operation_failed",
        }
    }
}

/// Result type alias for famtask operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_classification() {
        assert_eq!(
            Error::TaskNotFound("t1".to_string()).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(
            Error::NotPermitted("dependent".to_string()).exit_code(),
            exit_codes::POLICY_BLOCKED
        );
        assert_eq!(
            Error::Repository("offline".to_string()).exit_code(),
            exit_codes::OPERATION_FAILED
        );
    }

    #[test]
    fn json_error_carries_kind() {
        let err = Error::NotPermitted("dependents cannot resolve approvals".to_string());
        let json = JsonError::from(&err);
        assert_eq!(json.code, 3);
        assert_eq!(json.kind, "policy_blocked");
        assert!(json.error.contains("dependents cannot resolve approvals"));
    }
}
