//! Capture adapter driving the `shot-scraper` CLI.
//!
//! Each item is captured by one subprocess. On cancellation the process gets
//! SIGTERM, then SIGKILL once the grace period runs out, and is always
//! reaped before `process` returns.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ItemProcessor, ProcessError};
use crate::domain::Item;

/// Default capture binary, looked up on `PATH`
pub const DEFAULT_BINARY: &str = "shot-scraper";

/// Viewport width in pixels
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1030;

/// Time a cancelled capture gets to exit before it is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Page script run before the screenshot: hides consent banners, ads and
/// side columns, widens the article column and forces lazy images to load.
pub const DEFAULT_PAGE_SCRIPT: &str = r#"document.body.insertAdjacentHTML('beforeend', '<style>#appconsent, .fig-ad-content, .fig-ad-content--special, .layout_right, .fig-right, .fig-recommended, .fig-suggested, .fig-newsletter-box, .fig-comments, .fig-embed, .fig-seo-footer, #tabbar, #bottom {display:none !important;} .layout_main {grid-column: 2/4;} .fig-main-col {max-width: 90% !important;} body, .fig-body {margin-bottom: 0 !important;} .fig-lazy img {transition-duration: 0s;}</style>'); document.querySelectorAll('.fig-lazy > img[data-srcset]').forEach(el => el.setAttribute('srcset', el.getAttribute('data-srcset')));"#;

/// Item processor spawning `shot-scraper <url> --width .. --javascript .. --output ..`
pub struct ShotScraper {
    binary: PathBuf,
    width: u32,
    script: String,
    grace_period: Duration,
}

impl Default for ShotScraper {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl ShotScraper {
    /// Create a processor for the given binary with default settings
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            width: DEFAULT_VIEWPORT_WIDTH,
            script: DEFAULT_PAGE_SCRIPT.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command-line arguments for capturing `item` into `destination`
    fn args(&self, item: &Item, destination: &Path) -> Vec<OsString> {
        vec![
            item.locator.clone().into(),
            "--width".into(),
            self.width.to_string().into(),
            "--javascript".into(),
            self.script.clone().into(),
            "--output".into(),
            destination.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl ItemProcessor for ShotScraper {
    fn name(&self) -> &str {
        "shot-scraper"
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

        let mut command = Command::new(&self.binary);
        command
            .args(self.args(item, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so the browser the tool starts can be signalled with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::ToolLaunchFailed {
                program: self.binary.display().to_string(),
                message: e.to_string(),
            })?;

        debug!(pid = child.id(), locator = %item.locator, "Capture started");

        // Drain stderr concurrently so a chatty tool never blocks on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let waited = tokio::select! {
            biased;
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(status) => status,
            None => {
                terminate(&mut child, self.grace_period).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                debug!(locator = %item.locator, "Capture aborted");
                return Err(ProcessError::Aborted);
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let status = status.map_err(|e| ProcessError::ToolInvocationFailed {
            exit_code: -1,
            stderr: e.to_string(),
        })?;

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            warn!(exit_code, locator = %item.locator, stderr = %stderr.trim(), "Capture failed");
            return Err(ProcessError::ToolInvocationFailed {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            debug!(locator = %item.locator, stderr = %stderr.trim(), "Capture tool diagnostics");
        }

        Ok(())
    }
}

/// Stop a running capture and everything it started.
///
/// Sends SIGTERM to the capture's process group, waits up to `grace` for the
/// tool to exit, then SIGKILLs whatever is left of the group and reaps the tool.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return; // Already reaped
    };
    let group = Pid::from_raw(-(pid as i32));

    match kill(group, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "SIGTERM to capture process group failed"),
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => debug!(pid, ?status, "Capture process exited after SIGTERM"),
        Err(_) => warn!(
            pid,
            grace_ms = grace.as_millis() as u64,
            "Capture process ignored SIGTERM, killing"
        ),
    }

    // Helpers may outlive the tool; the group id stays valid while any member lives
    match kill(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "SIGKILL to capture process group failed"),
    }

    if let Err(e) = child.wait().await {
        warn!(pid, error = %e, "Failed to reap capture process");
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill capture process");
    }
}
