//! Run controller for the capture pipeline.
//!
//! Drives one run through fetch → capture → package → deliver, streaming
//! progress to the caller and honouring cancellation. Captures run in
//! sequential batches of at most [`MAX_IN_FLIGHT`] items; a batch must fully
//! settle before the next one is dispatched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{
    DeliveryClient, HttpSourceClient, ItemProcessor, Packager, ProcessError, ShotScraper,
    SftpDelivery, SourceClient, TarZstPackager,
};
use crate::config::{ConfigError, ResolvedConfig};
use crate::domain::{
    sanitize_component, ActiveItem, ErrorKind, Item, ItemFailure, Run, RunError, RunResult,
    RunUpdate, Stage,
};

use super::format::{format_bytes, format_duration};
use super::progress::{self, ProgressSender, ProgressStream};
use super::workspace::RunWorkspace;

/// Maximum number of captures running at the same time
pub const MAX_IN_FLIGHT: usize = 3;

/// Settings that shape a run but are not collaborators
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Parent of the per-run working directories
    pub work_root: PathBuf,

    /// Archive names are `<prefix>-<filter>.<ext>`
    pub archive_prefix: String,

    /// Optional public link template, `{filter}` is substituted
    pub download_url_template: Option<String>,
}

impl RunSettings {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            archive_prefix: "capture".to_string(),
            download_url_template: None,
        }
    }

    fn archive_name(&self, filter_key: &str, extension: &str) -> String {
        format!(
            "{}-{}.{}",
            self.archive_prefix,
            sanitize_component(filter_key),
            extension
        )
    }

    fn download_url(&self, filter_key: &str) -> Option<String> {
        self.download_url_template
            .as_ref()
            .map(|template| template.replace("{filter}", filter_key))
    }
}

/// Why a run could not be started at all
#[derive(Debug, Error)]
pub enum StartError {
    #[error("filter key must not be empty")]
    EmptyFilter,

    #[error("failed to create working directory under {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Starts runs against a fixed set of collaborators
#[derive(Clone)]
pub struct Orchestrator {
    source: Arc<dyn SourceClient>,
    processor: Arc<dyn ItemProcessor>,
    packager: Arc<dyn Packager>,
    delivery: Arc<dyn DeliveryClient>,
    settings: Arc<RunSettings>,
}

impl Orchestrator {
    /// Create an orchestrator from explicit collaborators
    pub fn new(
        source: Arc<dyn SourceClient>,
        processor: Arc<dyn ItemProcessor>,
        packager: Arc<dyn Packager>,
        delivery: Arc<dyn DeliveryClient>,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            processor,
            packager,
            delivery,
            settings: Arc::new(settings),
        }
    }

    /// Build the production collaborators from configuration.
    ///
    /// Fails fast if delivery credentials or the capture tool are missing.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let sftp = config.sftp_settings()?;
        let binary = config.capture_binary()?;

        let mut processor = ShotScraper::new(binary)
            .with_width(config.capture.width)
            .with_grace_period(config.capture.grace_period);
        if let Some(ref script) = config.capture.script {
            processor = processor.with_script(script.clone());
        }

        let settings = RunSettings {
            work_root: config.work_dir.clone(),
            archive_prefix: config.naming.archive_prefix.clone(),
            download_url_template: config.naming.download_url_template.clone(),
        };

        Ok(Self::new(
            Arc::new(HttpSourceClient::new(config.source_url.clone())),
            Arc::new(processor),
            Arc::new(TarZstPackager::new()),
            Arc::new(SftpDelivery::new(sftp)),
            settings,
        ))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Start a run for `filter_key` over the window beginning at `window_start`.
    ///
    /// The run executes on its own task; progress and the terminal outcome
    /// are read from the returned handle.
    pub fn start(&self, filter_key: &str, window_start: NaiveDate) -> Result<RunHandle, StartError> {
        let filter_key = filter_key.trim();
        if filter_key.is_empty() {
            return Err(StartError::EmptyFilter);
        }

        let run_id = Uuid::new_v4();
        let workspace = RunWorkspace::create(&self.settings.work_root, run_id)
            .map(Arc::new)
            .map_err(|source| StartError::Workspace {
                path: self.settings.work_root.clone(),
                source,
            })?;

        let (sender, stream) = progress::channel();
        let cancel = CancellationToken::new();

        let execution = RunExecution {
            orchestrator: self.clone(),
            run: Run::new(run_id, filter_key.to_string(), window_start),
            cancel: cancel.clone(),
            workspace: workspace.clone(),
            started: Instant::now(),
        };

        let span = tracing::info_span!("run", %run_id, filter = %filter_key);
        let task = tokio::spawn(execution.drive(sender).instrument(span));

        Ok(RunHandle {
            run_id,
            cancel,
            updates: stream,
            workspace,
            task: Some(task),
        })
    }
}

/// Caller's side of a started run
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    updates: ProgressStream,
    workspace: Arc<RunWorkspace>,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The run's working directory
    pub fn workspace_path(&self) -> &Path {
        self.workspace.root()
    }

    /// Request cancellation. Idempotent; no effect once the run has ended.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(run_id = %self.run_id, "Cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Token observers can use to watch for cancellation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next update; `None` after the terminal update
    pub async fn next_update(&mut self) -> Option<RunUpdate> {
        self.updates.recv().await
    }

    /// Drain updates until the terminal one, passing progress to `on_progress`
    pub async fn wait_with<F>(&mut self, mut on_progress: F) -> Result<RunResult, RunError>
    where
        F: FnMut(&RunUpdate),
    {
        while let Some(update) = self.next_update().await {
            on_progress(&update);
            match update {
                RunUpdate::Progress(_) => continue,
                RunUpdate::Completed(result) => return Ok(result),
                RunUpdate::Failed(error) => return Err(error),
            }
        }

        Err(RunError::new(
            ErrorKind::Cancelled,
            "Run ended without reporting an outcome",
        ))
    }

    /// Drain updates until the terminal one
    pub async fn wait(&mut self) -> Result<RunResult, RunError> {
        self.wait_with(|_| {}).await
    }

    /// Release the run's working directory and archive.
    ///
    /// If the run is still going it is cancelled first and awaited, so
    /// nothing writes into the directory after removal. Safe to call twice.
    pub async fn cleanup(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                self.cancel();
            }
            if let Err(e) = task.await {
                warn!(run_id = %self.run_id, error = %e, "Run task ended abnormally");
            }
        }
        self.workspace.cleanup().await;
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        // The workspace itself is removed when the task lets go of it
        self.cancel.cancel();
    }
}

/// State carried by one run's task
struct RunExecution {
    orchestrator: Orchestrator,
    run: Run,
    cancel: CancellationToken,
    workspace: Arc<RunWorkspace>,
    started: Instant,
}

impl RunExecution {
    /// Execute the run and publish exactly one terminal update
    async fn drive(mut self, progress: ProgressSender) {
        info!(window_start = %self.run.window_start, "Run started");

        match self.execute(&progress).await {
            Ok(result) => {
                self.run.advance(Stage::Completed);
                info!(
                    articles = result.articles_captured,
                    remote_path = %result.remote_path,
                    total_time = %result.total_time,
                    "Run completed"
                );
                progress.complete(result);
            }
            Err(err) => {
                self.run.advance(Stage::Error);
                self.run.active = None;
                if err.is_cancelled() {
                    warn!("Run cancelled");
                } else {
                    error!(kind = ?err.kind, error = %err.message, "Run failed");
                }
                progress.fail(err);
            }
        }
    }

    async fn execute(&mut self, progress: &ProgressSender) -> Result<RunResult, RunError> {
        let Orchestrator {
            source,
            packager,
            delivery,
            settings,
            ..
        } = self.orchestrator.clone();

        // Fetching
        progress.progress(self.run.snapshot());
        let items = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RunError::cancelled()),
            fetched = source.fetch(&self.run.filter_key, self.run.window_start) => {
                fetched.map_err(|e| RunError::new(ErrorKind::SourceUnavailable, e.to_string()))?
            }
        };

        if items.is_empty() {
            return Err(RunError::new(
                ErrorKind::NoItems,
                format!(
                    "No items found for '{}' in the window starting {}",
                    self.run.filter_key, self.run.window_start
                ),
            ));
        }

        // Capturing
        self.enter(Stage::Capturing)?;
        self.run.total = items.len();
        info!(total = items.len(), "Capturing items");
        progress.progress(self.run.snapshot());

        let files = self.capture_all(&items, progress).await?;

        // Packaging
        self.enter(Stage::Packaging)?;
        self.run.completed = self.run.total;
        progress.progress(self.run.snapshot());

        let archive_name = settings.archive_name(&self.run.filter_key, packager.extension());
        let archive_path = self.workspace.archive_path(&archive_name);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RunError::cancelled()),
            packed = packager.pack(&files, &archive_path) => {
                packed.map_err(|e| RunError::new(ErrorKind::PackagingFailed, e.to_string()))?
            }
        }

        let archive_size_bytes = tokio::fs::metadata(&archive_path)
            .await
            .map(|meta| meta.len())
            .map_err(|e| {
                RunError::new(
                    ErrorKind::PackagingFailed,
                    format!("archive missing after packaging: {}", e),
                )
            })?;
        debug!(archive = %archive_name, bytes = archive_size_bytes, "Archive written");

        // Delivering
        self.enter(Stage::Delivering)?;
        progress.progress(self.run.snapshot());

        let remote_path = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RunError::cancelled()),
            delivered = delivery.deliver(&archive_path, &archive_name) => {
                delivered.map_err(|e| RunError::new(ErrorKind::DeliveryFailed, e.to_string()))?
            }
        };

        // A cancel that raced the last await still wins
        if self.cancel.is_cancelled() {
            return Err(RunError::cancelled());
        }

        let elapsed = self.started.elapsed();
        let completed_at = Local::now();

        Ok(RunResult {
            run_id: self.run.id,
            filter_key: self.run.filter_key.clone(),
            articles_captured: files.len(),
            archive_name,
            archive_size_bytes,
            archive_size: format_bytes(archive_size_bytes),
            elapsed_ms: elapsed.as_millis() as u64,
            total_time: format_duration(elapsed),
            remote_path,
            download_url: settings.download_url(&self.run.filter_key),
            completed_at,
            upload_date: completed_at.format("%d/%m/%Y %H:%M").to_string(),
        })
    }

    /// Checked stage transition: a pending cancellation wins
    fn enter(&mut self, stage: Stage) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::cancelled());
        }
        let from = self.run.stage;
        let advanced = self.run.advance(stage);
        debug_assert!(advanced, "invalid stage transition {} -> {}", from, stage);
        info!(stage = %stage, "Stage changed");
        Ok(())
    }

    /// Capture every item in batches, returning the produced files in order
    async fn capture_all(
        &mut self,
        items: &[Item],
        progress: &ProgressSender,
    ) -> Result<Vec<PathBuf>, RunError> {
        let processor = self.orchestrator.processor.clone();
        let mut produced = Vec::with_capacity(items.len());

        for (batch_no, batch) in items.chunks(MAX_IN_FLIGHT).enumerate() {
            if self.cancel.is_cancelled() {
                return Err(RunError::cancelled());
            }

            let batch_start = batch_no * MAX_IN_FLIGHT;
            let batch_cancel = self.cancel.child_token();
            let mut captures = Vec::with_capacity(batch.len());

            for (offset, item) in batch.iter().enumerate() {
                let index = batch_start + offset + 1;
                self.run.completed = batch_start;
                self.run.active = Some(ActiveItem::new(index, item));
                progress.progress(self.run.snapshot());

                let destination = self
                    .workspace
                    .capture_path(&item.capture_file_name(&self.run.filter_key, index));
                debug!(index, locator = %item.locator, "Dispatching capture");

                captures.push(capture_one(
                    processor.as_ref(),
                    index,
                    item,
                    destination,
                    &batch_cancel,
                ));
            }

            let outcomes = join_all(captures).await;

            // Cancellation wins over any failure that surfaced meanwhile
            if self.cancel.is_cancelled() {
                return Err(RunError::cancelled());
            }

            let mut failure = None;
            for outcome in outcomes {
                match outcome {
                    Ok(path) => produced.push(path),
                    Err((index, err)) if !err.is_aborted() && failure.is_none() => {
                        failure = Some((index, err));
                    }
                    Err(_) => {}
                }
            }

            if let Some((index, err)) = failure {
                let item = &items[index - 1];
                return Err(RunError::item_failed(
                    ItemFailure::from(&err),
                    format!("Article {} ({}) could not be captured: {}", index, item.locator, err),
                ));
            }

            self.run.completed = batch_start + batch.len();
            self.run.active = None;
            progress.progress(self.run.snapshot());
        }

        Ok(produced)
    }
}

/// Capture one item; a real failure stops the rest of its batch
async fn capture_one(
    processor: &dyn ItemProcessor,
    index: usize,
    item: &Item,
    destination: PathBuf,
    batch_cancel: &CancellationToken,
) -> Result<PathBuf, (usize, ProcessError)> {
    match processor.process(item, &destination, batch_cancel).await {
        Ok(()) => Ok(destination),
        Err(err) => {
            if !err.is_aborted() {
                warn!(index, error = %err, "Capture failed, stopping batch");
                batch_cancel.cancel();
            }
            Err((index, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name() {
        let settings = RunSettings {
            archive_prefix: "LeFigaro".to_string(),
            ..RunSettings::new("/tmp")
        };
        assert_eq!(settings.archive_name("75", "tar.zst"), "LeFigaro-75.tar.zst");
        assert_eq!(settings.archive_name("a/b", "tar.zst"), "LeFigaro-a-b.tar.zst");
    }

    #[test]
    fn test_download_url_template() {
        let mut settings = RunSettings::new("/tmp");
        assert_eq!(settings.download_url("75"), None);

        settings.download_url_template = Some("https://example.org/?{filter}".to_string());
        assert_eq!(
            settings.download_url("75").as_deref(),
            Some("https://example.org/?75")
        );
    }

    #[test]
    fn test_batches_are_capped() {
        let sizes: Vec<usize> = (0..7)
            .collect::<Vec<_>>()
            .chunks(MAX_IN_FLIGHT)
            .map(|c| c.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }
}
