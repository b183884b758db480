//! Domain types for the snapbundle pipeline.
//!
//! This module contains the core data structures:
//! - Item: One unit of source material
//! - Run: Pipeline execution state
//! - Events: Progress and terminal updates streamed to observers
//! - Error: Terminal failure payload

pub mod error;
pub mod events;
pub mod item;
pub mod run;

// Re-export commonly used types
pub use error::{ErrorKind, ItemFailure, RunError};
pub use events::{ProgressEvent, RunUpdate};
pub use item::{sanitize_component, Item, DATE_LABEL_FORMAT};
pub use run::{ActiveItem, Run, RunResult, Stage};
