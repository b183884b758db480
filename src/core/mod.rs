//! Core orchestration logic.
//!
//! This module contains:
//! - Orchestrator: Starts runs and drives them through every stage
//! - Progress: Ordered update stream from a run to its observer
//! - Workspace: Per-run working directory
//! - Format: Human-readable sizes and durations

pub mod format;
pub mod orchestrator;
pub mod progress;
pub mod workspace;

// Re-export commonly used types
pub use format::{format_bytes, format_duration};
pub use orchestrator::{Orchestrator, RunHandle, RunSettings, StartError, MAX_IN_FLIGHT};
pub use progress::{ProgressSender, ProgressStream};
pub use workspace::RunWorkspace;
