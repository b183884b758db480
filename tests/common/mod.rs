//! Test doubles for the run controller's collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use snapbundle::adapters::{
    select_window, DeliveryClient, DeliveryError, ItemProcessor, PackError, Packager,
    ProcessError, SourceClient, SourceError,
};
use snapbundle::core::{Orchestrator, RunSettings};
use snapbundle::domain::{Item, RunUpdate};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `count` items dated inside the window starting 2025-01-06
pub fn items(count: usize) -> Vec<Item> {
    (1..=count)
        .map(|i| Item::new(format!("https://example.org/article-{}", i), "10/01/2025"))
        .collect()
}

pub fn window_start() -> NaiveDate {
    date(2025, 1, 6)
}

// ============================================================================
// Source
// ============================================================================

/// Serves a fixed list, applying the real window filter
pub struct StaticSource {
    items: Vec<Item>,
    error: Option<SourceError>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: SourceError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn fetch(
        &self,
        _filter_key: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<Item>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.error {
            Some(ref err) => Err(err.clone()),
            None => Ok(select_window(self.items.clone(), window_start)),
        }
    }
}

// ============================================================================
// Processor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Started(String),
    Finished(String),
    Aborted(String),
}

/// Processor whose per-item delay and outcome are scripted
pub struct ScriptedProcessor {
    delay: Duration,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    launch_failures: HashSet<String>,
    stubborn: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    trace: Mutex<Vec<Trace>>,
}

impl Default for ScriptedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl ScriptedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            delays: HashMap::new(),
            failures: HashSet::new(),
            launch_failures: HashSet::new(),
            stubborn: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            trace: Mutex::new(Vec::new()),
        }
    }

    /// Give one locator its own delay
    pub fn with_delay_for(mut self, locator: &str, delay: Duration) -> Self {
        self.delays.insert(locator.to_string(), delay);
        self
    }

    /// Make one locator fail after its delay
    pub fn failing_on(mut self, locator: &str) -> Self {
        self.failures.insert(locator.to_string());
        self
    }

    /// Make one locator fail as if the tool could not be started
    pub fn failing_to_launch_on(mut self, locator: &str) -> Self {
        self.launch_failures.insert(locator.to_string());
        self
    }

    /// Make one locator ignore cancellation until its delay has passed
    pub fn stubborn_on(mut self, locator: &str) -> Self {
        self.stubborn.insert(locator.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn trace(&self) -> Vec<Trace> {
        self.trace.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.trace()
            .into_iter()
            .filter_map(|t| match t {
                Trace::Started(locator) => Some(locator),
                _ => None,
            })
            .collect()
    }

    fn record(&self, entry: Trace) {
        self.trace.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ItemProcessor for ScriptedProcessor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn process(
        &self,
        item: &Item,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Aborted);
        }
        if self.launch_failures.contains(&item.locator) {
            return Err(ProcessError::ToolLaunchFailed {
                program: "scripted".to_string(),
                message: "No such file or directory".to_string(),
            });
        }

        self.record(Trace::Started(item.locator.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(&item.locator).copied().unwrap_or(self.delay);
        let stubborn = self.stubborn.contains(&item.locator);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !stubborn => Err(ProcessError::Aborted),
            _ = tokio::time::sleep(delay) => {
                if self.failures.contains(&item.locator) {
                    Err(ProcessError::ToolInvocationFailed {
                        exit_code: 1,
                        stderr: "page did not load".to_string(),
                    })
                } else {
                    tokio::fs::write(destination, item.locator.as_bytes())
                        .await
                        .map_err(|e| ProcessError::ToolLaunchFailed {
                            program: "scripted".to_string(),
                            message: e.to_string(),
                        })
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Err(ProcessError::Aborted) => self.record(Trace::Aborted(item.locator.clone())),
            _ => self.record(Trace::Finished(item.locator.clone())),
        }
        outcome
    }
}

// ============================================================================
// Packager
// ============================================================================

/// Writes a listing of its inputs instead of a real archive
#[derive(Default)]
pub struct RecordingPackager {
    fail: bool,
    delay: Duration,
    pub packed: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingPackager {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.packed.lock().unwrap().len()
    }
}

#[async_trait]
impl Packager for RecordingPackager {
    fn extension(&self) -> &str {
        "tar.zst"
    }

    async fn pack(&self, files: &[PathBuf], output: &Path) -> Result<(), PackError> {
        self.packed.lock().unwrap().push(files.to_vec());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(PackError::Task("disk full".to_string()));
        }

        let listing: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        tokio::fs::write(output, listing.join("\n"))
            .await
            .map_err(|source| PackError::Io {
                path: output.to_path_buf(),
                source,
            })
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Records uploads instead of performing them
#[derive(Default)]
pub struct RecordingDelivery {
    fail: bool,
    delay: Duration,
    pub delivered: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn deliver(&self, local_path: &Path, file_name: &str) -> Result<String, DeliveryError> {
        tokio::time::sleep(self.delay).await;
        self.delivered
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), file_name.to_string()));

        if self.fail {
            return Err(DeliveryError::Auth {
                username: "capture".to_string(),
                message: "permission denied".to_string(),
            });
        }
        Ok(format!("/uploads/2025/{}", file_name))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub source: Arc<StaticSource>,
    pub processor: Arc<ScriptedProcessor>,
    pub packager: Arc<RecordingPackager>,
    pub delivery: Arc<RecordingDelivery>,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(source: StaticSource, processor: ScriptedProcessor) -> Self {
        Self::with_all(
            source,
            processor,
            RecordingPackager::default(),
            RecordingDelivery::default(),
        )
    }

    pub fn with_all(
        source: StaticSource,
        processor: ScriptedProcessor,
        packager: RecordingPackager,
        delivery: RecordingDelivery,
    ) -> Self {
        Self {
            source: Arc::new(source),
            processor: Arc::new(processor),
            packager: Arc::new(packager),
            delivery: Arc::new(delivery),
            work_dir: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.source.clone(),
            self.processor.clone(),
            self.packager.clone(),
            self.delivery.clone(),
            RunSettings::new(self.work_dir.path()),
        )
    }
}

/// Drain every update from a handle, including the terminal one
pub async fn collect(handle: &mut snapbundle::RunHandle) -> Vec<RunUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = handle.next_update().await {
        updates.push(update);
    }
    updates
}
