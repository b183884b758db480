//! Adapter interfaces for external systems.
//!
//! The run controller only talks to its collaborators through these
//! traits: the item source, the capture tool, the archive writer and the
//! remote store.

pub mod archive;
pub mod error;
pub mod sftp;
pub mod shot_scraper;
pub mod source;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::domain::Item;

pub use archive::TarZstPackager;
pub use error::{DeliveryError, PackError, ProcessError, SourceError};
pub use sftp::{SftpDelivery, SftpSettings};
pub use shot_scraper::ShotScraper;
pub use source::{select_window, window_end, HttpSourceClient};

/// Looks up the items to capture
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Items for `filter_key` dated inside the window starting at `window_start`
    async fn fetch(&self, filter_key: &str, window_start: NaiveDate)
        -> Result<Vec<Item>, SourceError>;
}

/// Produces the capture of one item
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Human-readable processor name
    fn name(&self) -> &str;

    /// Capture `item` into `destination`.
    ///
    /// Must return [`ProcessError::Aborted`] once `cancel` fires, after the
    /// underlying work has fully stopped.
    async fn process(
        &self,
        item: &Item,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError>;
}

/// Bundles produced files into one archive
#[async_trait]
pub trait Packager: Send + Sync {
    /// Extension of the archives this packager writes (without leading dot)
    fn extension(&self) -> &str;

    /// Write `files` into a single archive at `output`.
    ///
    /// Nothing is left at `output` if this fails.
    async fn pack(&self, files: &[PathBuf], output: &Path) -> Result<(), PackError>;
}

/// Uploads the archive to the remote store
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Upload `local_path` as `file_name`, returning the remote path
    async fn deliver(&self, local_path: &Path, file_name: &str) -> Result<String, DeliveryError>;
}
