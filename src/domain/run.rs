//! Run state and its public snapshots.
//!
//! A Run represents a single execution of the capture pipeline for one
//! filter key and date window.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::ProgressEvent;
use super::item::Item;

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Looking up items at the source
    Fetching,

    /// Producing one capture per item
    Capturing,

    /// Bundling captures into the archive
    Packaging,

    /// Uploading the archive
    Delivering,

    /// Finished successfully
    Completed,

    /// Finished with an error (including cancellation)
    Error,
}

impl Stage {
    /// Whether the run is over
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether a run in this stage may move to `next`.
    ///
    /// Non-terminal stages only move forward by one step, or to `Error`.
    pub fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, Self::Error) => true,
            (Self::Fetching, Self::Capturing)
            | (Self::Capturing, Self::Packaging)
            | (Self::Packaging, Self::Delivering)
            | (Self::Delivering, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Capturing => "capturing",
            Self::Packaging => "packaging",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// The item currently being worked on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveItem {
    /// 1-based position in the fetched sequence
    pub index: usize,

    pub locator: String,

    pub date_label: String,
}

impl ActiveItem {
    pub fn new(index: usize, item: &Item) -> Self {
        Self {
            index,
            locator: item.locator.clone(),
            date_label: item.date_label.clone(),
        }
    }
}

/// Mutable state of a run, owned by the run's controller task
#[derive(Debug, Clone)]
pub struct Run {
    /// Unique identifier, also names the working directory
    pub id: Uuid,

    pub filter_key: String,

    /// First day of the date window
    pub window_start: NaiveDate,

    pub stage: Stage,

    /// Number of items, known once fetched
    pub total: usize,

    /// Number of items captured so far
    pub completed: usize,

    pub active: Option<ActiveItem>,
}

impl Run {
    /// Create a run in the `fetching` stage
    pub fn new(id: Uuid, filter_key: String, window_start: NaiveDate) -> Self {
        Self {
            id,
            filter_key,
            window_start,
            stage: Stage::Fetching,
            total: 0,
            completed: 0,
            active: None,
        }
    }

    /// Move to `next`. Returns false (and leaves the stage untouched) if the
    /// transition is not allowed.
    pub fn advance(&mut self, next: Stage) -> bool {
        if !self.stage.can_advance_to(next) {
            return false;
        }
        self.stage = next;
        true
    }

    /// Point-in-time snapshot for observers
    pub fn snapshot(&self) -> ProgressEvent {
        ProgressEvent {
            run_id: self.id,
            stage: self.stage,
            total: self.total,
            completed: self.completed,
            active: self.active.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Terminal success payload of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,

    pub filter_key: String,

    /// Number of items captured and archived
    pub articles_captured: usize,

    pub archive_name: String,

    pub archive_size_bytes: u64,

    /// Human-readable archive size (e.g. `1.5 MB`)
    pub archive_size: String,

    pub elapsed_ms: u64,

    /// Human-readable elapsed time (e.g. `2m 5s`)
    pub total_time: String,

    /// Where the archive landed on the remote store
    pub remote_path: String,

    /// Public link to the delivered material, if configured
    pub download_url: Option<String>,

    pub completed_at: DateTime<Local>,

    /// `completed_at` as `dd/mm/yyyy HH:MM`
    pub upload_date: String,
}
