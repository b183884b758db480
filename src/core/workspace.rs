//! Per-run working directory.
//!
//! Layout: `<work_root>/<run_id>/captures/*.png` plus the archive at
//! `<work_root>/<run_id>/<archive name>`. Removing the run directory
//! releases everything the run wrote.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::sanitize_component;

const CAPTURES_DIR: &str = "captures";

/// Working directory exclusive to one run.
///
/// Removed by [`RunWorkspace::cleanup`], or on drop if cleanup never ran.
#[derive(Debug)]
pub struct RunWorkspace {
    root: PathBuf,
    captures: PathBuf,
    released: AtomicBool,
}

impl RunWorkspace {
    /// Create `<work_root>/<run_id>/captures`
    pub fn create(work_root: &Path, run_id: Uuid) -> io::Result<Self> {
        let root = work_root.join(run_id.to_string());
        let captures = root.join(CAPTURES_DIR);
        std::fs::create_dir_all(&captures)?;
        debug!(path = %root.display(), "Created run workspace");

        Ok(Self {
            root,
            captures,
            released: AtomicBool::new(false),
        })
    }

    /// Run directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination for a capture file
    pub fn capture_path(&self, file_name: &str) -> PathBuf {
        self.captures.join(sanitize_component(file_name))
    }

    /// Destination for the run's archive
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.root.join(sanitize_component(file_name))
    }

    /// Whether the workspace has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remove the run directory. Idempotent; failures are logged only.
    pub async fn cleanup(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Removed run workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove run workspace"),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "Removed run workspace on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove run workspace"),
        }
    }
}
