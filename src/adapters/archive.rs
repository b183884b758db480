//! Archive writer producing `.tar.zst` bundles.
//!
//! The archive is streamed into a temporary file next to the destination and
//! renamed into place once complete, so a failed write never leaves a partial
//! archive at the output path.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{PackError, Packager};

/// Archive extension
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Packager writing a zstd-compressed tar stream
pub struct TarZstPackager {
    level: i32,
}

impl Default for TarZstPackager {
    fn default() -> Self {
        Self::new()
    }
}

impl TarZstPackager {
    /// Create a packager using the highest zstd compression level
    pub fn new() -> Self {
        Self {
            level: *zstd::compression_level_range().end(),
        }
    }

    /// Create a packager with an explicit compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

#[async_trait]
impl Packager for TarZstPackager {
    fn extension(&self) -> &str {
        ARCHIVE_EXTENSION
    }

    #[instrument(skip(self, files), fields(files = files.len(), output = %output.display()))]
    async fn pack(&self, files: &[PathBuf], output: &Path) -> Result<(), PackError> {
        let files = files.to_vec();
        let output = output.to_path_buf();
        let level = self.level;

        tokio::task::spawn_blocking(move || write_archive(&files, &output, level))
            .await
            .map_err(|e| PackError::Task(e.to_string()))?
    }
}

/// Write `files` into a tar.zst archive at `output`, entries named by basename
fn write_archive(files: &[PathBuf], output: &Path, level: i32) -> Result<(), PackError> {
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Removed on drop unless persisted
    let staging = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)
        .map_err(PackError::io(parent))?;

    {
        let file: &File = staging.as_file();
        let encoder = zstd::Encoder::new(file, level).map_err(PackError::io(output))?;
        let mut builder = tar::Builder::new(encoder);

        for path in files {
            let name = path
                .file_name()
                .ok_or_else(|| PackError::InvalidInput(path.clone()))?;
            builder
                .append_path_with_name(path, name)
                .map_err(PackError::io(path.as_path()))?;
            debug!(file = %path.display(), "Archived");
        }

        let encoder = builder.into_inner().map_err(PackError::io(output))?;
        let mut file = encoder.finish().map_err(PackError::io(output))?;
        file.flush().map_err(PackError::io(output))?;
    }

    staging
        .as_file()
        .sync_all()
        .map_err(PackError::io(output))?;
    staging
        .persist(output)
        .map_err(|e| PackError::Io {
            path: output.to_path_buf(),
            source: e.error,
        })?;

    Ok(())
}
