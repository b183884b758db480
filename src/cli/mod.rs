//! Command-line interface for snapbundle.
//!
//! Provides commands for previewing how many items a run would capture,
//! running a capture end to end, and inspecting the resolved configuration.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::adapters::{window_end, HttpSourceClient, SourceClient};
use crate::config::{self, ResolvedConfig};
use crate::core::Orchestrator;
use crate::domain::{ProgressEvent, RunUpdate};

/// snapbundle - Capture, bundle and deliver article screenshots
#[derive(Parser, Debug)]
#[command(name = "snapbundle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Count the items a run would capture
    Count {
        /// Filter key selecting the item collection (e.g. a department code)
        #[arg(short, long)]
        filter: String,

        /// First day of the 7-week window (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,
    },

    /// Capture, package and deliver every item in the window
    Run {
        /// Filter key selecting the item collection (e.g. a department code)
        #[arg(short, long)]
        filter: String,

        /// First day of the 7-week window (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,

        /// Emit updates as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{}': {}", raw, e))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Count { filter, from } => count_items(&filter, from).await,
            Commands::Run { filter, from, json } => run_capture(&filter, from, json).await,
            Commands::Config => show_config(),
        }
    }
}

/// Print how many items fall in the window
async fn count_items(filter: &str, from: NaiveDate) -> Result<()> {
    let cfg = config::load_config()?;
    let source = HttpSourceClient::new(cfg.source_url.clone());

    let items = source
        .fetch(filter.trim(), from)
        .await
        .with_context(|| format!("Failed to fetch items from {}", source.url()))?;

    println!(
        "{} article(s) for '{}' between {} and {}",
        items.len(),
        filter.trim(),
        from,
        window_end(from)
    );

    Ok(())
}

/// Run a capture and follow it to the end
async fn run_capture(filter: &str, from: NaiveDate, json: bool) -> Result<()> {
    let cfg = config::load_config()?;
    let orchestrator = Orchestrator::from_config(&cfg)?;

    let mut handle = orchestrator.start(filter, from)?;
    eprintln!("[Run {} started]", handle.run_id());

    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Interrupted, cancelling run]");
            cancel.cancel();
        }
    });

    let outcome = handle
        .wait_with(|update| {
            if json {
                print_json(update);
            } else if let Some(event) = update.as_progress() {
                print_progress(event);
            }
        })
        .await;

    interrupt.abort();
    handle.cleanup().await;

    match outcome {
        Ok(result) => {
            if !json {
                println!("Articles captured: {}", result.articles_captured);
                println!("Archive:           {} ({})", result.archive_name, result.archive_size);
                println!("Delivered to:      {}", result.remote_path);
                if let Some(ref url) = result.download_url {
                    println!("Download:          {}", url);
                }
                println!("Uploaded:          {}", result.upload_date);
                println!("Total time:        {}", result.total_time);
            }
            eprintln!("\n[Run {} completed successfully]", result.run_id);
            Ok(())
        }
        Err(error) => {
            match error.cause {
                Some(cause) => eprintln!(
                    "\n[Run failed: {:?} ({:?}): {}]",
                    error.kind, cause, error.message
                ),
                None => eprintln!("\n[Run failed: {:?}: {}]", error.kind, error.message),
            }
            std::process::exit(1);
        }
    }
}

fn print_json(update: &RunUpdate) {
    match serde_json::to_string(update) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize update"),
    }
}

fn print_progress(event: &ProgressEvent) {
    match event.active {
        Some(ref active) => eprintln!(
            "[{}] {}/{} article {} ({}, {})",
            event.stage, event.completed, event.total, active.index, active.date_label, active.locator
        ),
        None if event.total > 0 => {
            eprintln!("[{}] {}/{}", event.stage, event.completed, event.total)
        }
        None => eprintln!("[{}]", event.stage),
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::load_config()?;
    print_config(&cfg);
    Ok(())
}

fn print_config(cfg: &ResolvedConfig) {
    let unset = || "(unset)".to_string();

    println!("snapbundle configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Work dir:    {}", cfg.work_dir.display());
    println!();
    println!("Source:");
    println!("  URL: {}", cfg.source_url);
    println!();
    println!("Capture:");
    match cfg.capture_binary() {
        Ok(path) => println!("  Tool:         {}", path.display()),
        Err(e) => println!("  Tool:         {} ({})", cfg.capture.binary, e),
    }
    println!("  Width:        {}", cfg.capture.width);
    println!("  Grace period: {}s", cfg.capture.grace_period.as_secs());
    println!(
        "  Page script:  {}",
        if cfg.capture.script.is_some() { "custom" } else { "default" }
    );
    println!();
    println!("Delivery:");
    println!("  Host:      {}", cfg.delivery.host.clone().unwrap_or_else(unset));
    println!("  Port:      {}", cfg.delivery.port);
    println!("  Username:  {}", cfg.delivery.username.clone().unwrap_or_else(unset));
    println!(
        "  Password:  {}",
        if cfg.delivery.password.is_some() { "********" } else { "(unset)" }
    );
    println!("  Directory: {}", cfg.delivery.base_directory);
    println!();
    println!("Naming:");
    println!("  Archive prefix: {}", cfg.naming.archive_prefix);
    println!(
        "  Download URL:   {}",
        cfg.naming.download_url_template.clone().unwrap_or_else(unset)
    );
}
