//! Errors reported by the leaf collaborators.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ItemFailure;

/// Item source lookup failures. The lookup is all-or-nothing.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("request to item source failed: {0}")]
    Request(String),

    #[error("item source responded with status {0}")]
    Status(u16),

    #[error("item source returned an unreadable body: {0}")]
    Decode(String),
}

/// Failures of a single item capture
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {message}")]
    ToolLaunchFailed { program: String, message: String },

    #[error("capture tool failed with exit code {exit_code}: {stderr}")]
    ToolInvocationFailed { exit_code: i32, stderr: String },

    #[error("capture aborted")]
    Aborted,
}

impl ProcessError {
    /// Whether the capture stopped because it was told to
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<&ProcessError> for ItemFailure {
    fn from(err: &ProcessError) -> Self {
        match err {
            ProcessError::ToolLaunchFailed { .. } => Self::ToolLaunchFailed,
            ProcessError::ToolInvocationFailed { exit_code, .. } => Self::ToolInvocationFailed {
                exit_code: *exit_code,
            },
            ProcessError::Aborted => Self::Aborted,
        }
    }
}

/// Archive writing failures
#[derive(Debug, Error)]
pub enum PackError {
    #[error("failed to archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot archive {0}: path has no file name")]
    InvalidInput(PathBuf),

    #[error("archive task failed: {0}")]
    Task(String),
}

impl PackError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Remote delivery failures
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("authentication failed for user {username}: {message}")]
    Auth { username: String, message: String },

    #[error("failed to create remote directory {path}: {message}")]
    Directory { path: String, message: String },

    #[error("failed to upload to {path}: {message}")]
    Upload { path: String, message: String },

    #[error("delivery task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_detection() {
        assert!(ProcessError::Aborted.is_aborted());
        assert!(!ProcessError::ToolInvocationFailed {
            exit_code: 1,
            stderr: "boom".to_string()
        }
        .is_aborted());
    }

    #[test]
    fn test_invocation_message_carries_stderr() {
        let err = ProcessError::ToolInvocationFailed {
            exit_code: 2,
            stderr: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_item_failure_keeps_exit_code() {
        let err = ProcessError::ToolInvocationFailed {
            exit_code: 4,
            stderr: String::new(),
        };
        assert_eq!(
            ItemFailure::from(&err),
            ItemFailure::ToolInvocationFailed { exit_code: 4 }
        );

        let err = ProcessError::ToolLaunchFailed {
            program: "shot-scraper".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(ItemFailure::from(&err), ItemFailure::ToolLaunchFailed);
    }
}
