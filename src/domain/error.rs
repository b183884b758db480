//! Terminal failure payload of a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The item source could not be reached or answered badly
    SourceUnavailable,

    /// The source returned no item inside the window
    NoItems,

    /// An item could not be captured
    ItemProcessingFailed,

    /// The archive could not be written
    PackagingFailed,

    /// The archive could not be uploaded
    DeliveryFailed,

    /// The caller cancelled the run
    Cancelled,

    /// Required configuration is absent
    ConfigurationMissing,
}

/// Why a single item capture failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemFailure {
    /// The capture tool could not be started
    ToolLaunchFailed,

    /// The capture tool ran and exited non-zero
    ToolInvocationFailed { exit_code: i32 },

    /// The capture was terminated on request
    Aborted,
}

/// Terminal failure of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RunError {
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,

    /// Item-level cause, set for `ITEM_PROCESSING_FAILED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ItemFailure>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// An item capture failure that fails the run
    pub fn item_failed(cause: ItemFailure, message: impl Into<String>) -> Self {
        Self {
            cause: Some(cause),
            ..Self::new(ErrorKind::ItemProcessingFailed, message)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Run cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}
