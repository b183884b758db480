//! snapbundle - Capture pipeline orchestrator
//!
//! Fetches the articles published for a filter key over a 7-week window,
//! captures each one with an external screenshot tool, bundles the
//! captures into a single archive and uploads it over SFTP.
//!
//! # Architecture
//!
//! A run moves through fixed stages:
//! - `fetching` → `capturing` → `packaging` → `delivering` → `completed`
//! - any non-terminal stage may end in `error`
//!
//! Captures run in batches of at most three; progress is streamed to the
//! caller and the run can be cancelled at any time.
//!
//! # Modules
//!
//! - `adapters`: External collaborators (HTTP source, shot-scraper, tar+zstd, SFTP)
//! - `core`: Run orchestration, progress stream, working directories
//! - `domain`: Data structures (Item, Run, ProgressEvent, RunResult)
//! - `config`: Configuration discovery and environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Preview how many articles a run would capture
//! snapbundle count --filter 75 --from 2025-01-06
//!
//! # Run a capture, streaming JSON updates
//! snapbundle run --filter 75 --from 2025-01-06 --json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, RunHandle};
pub use domain::{
    ErrorKind, Item, ItemFailure, ProgressEvent, Run, RunError, RunResult, RunUpdate, Stage,
};
