//! Updates streamed from a run to its observer.
//!
//! A run emits any number of progress snapshots followed by exactly one
//! terminal update (`Completed` or `Failed`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RunError;
use super::run::{ActiveItem, RunResult, Stage};

/// Point-in-time snapshot of a run's public fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,

    pub stage: Stage,

    /// Number of items, 0 until fetched
    pub total: usize,

    /// Number of items captured so far
    pub completed: usize,

    /// Item being dispatched, if this event announces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveItem>,

    pub timestamp: DateTime<Utc>,
}

/// One value on a run's update stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunUpdate {
    /// Intermediate progress
    Progress(ProgressEvent),

    /// The run finished successfully
    #[serde(rename = "complete")]
    Completed(RunResult),

    /// The run failed or was cancelled
    #[serde(rename = "error")]
    Failed(RunError),
}

impl RunUpdate {
    /// Whether this update ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }

    /// The progress snapshot, if this is a progress update
    pub fn as_progress(&self) -> Option<&ProgressEvent> {
        match self {
            Self::Progress(event) => Some(event),
            _ => None,
        }
    }
}
