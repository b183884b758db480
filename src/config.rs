//! Configuration for snapbundle.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SFTP_*, SNAPBUNDLE_*)
//! 2. Config file (.snapbundle/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .snapbundle/config.yaml
//! - Relative paths in the config file are resolved against the project
//!   root (the directory holding `.snapbundle/`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::adapters::sftp::{SftpSettings, DEFAULT_BASE_DIRECTORY, DEFAULT_PORT};
use crate::adapters::shot_scraper::{DEFAULT_BINARY, DEFAULT_GRACE_PERIOD, DEFAULT_VIEWPORT_WIDTH};
use crate::adapters::source::DEFAULT_SOURCE_URL;
use crate::domain::{ErrorKind, RunError};

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub capture: CaptureSection,
    /// Parent of per-run working directories
    pub work_dir: Option<String>,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub naming: NamingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureSection {
    pub binary: Option<String>,
    pub width: Option<u32>,
    pub grace_period_seconds: Option<u64>,
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliverySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamingSection {
    pub archive_prefix: Option<String>,
    pub download_url_template: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Item source export URL
    pub source_url: String,
    pub capture: CaptureSettings,
    /// Parent of per-run working directories
    pub work_dir: PathBuf,
    pub delivery: DeliveryConfig,
    pub naming: NamingSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Program name or path of the capture tool
    pub binary: String,
    pub width: u32,
    pub grace_period: Duration,
    /// Replacement page script, if any
    pub script: Option<String>,
}

/// Delivery settings as found; completeness is checked by
/// [`ResolvedConfig::sftp_settings`]
#[derive(Clone)]
pub struct DeliveryConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_directory: String,
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("base_directory", &self.base_directory)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NamingSettings {
    pub archive_prefix: String,
    pub download_url_template: Option<String>,
}

/// Configuration problems that prevent a run from starting
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("capture tool not found: {0}")]
    ToolNotFound(String),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::new(ErrorKind::ConfigurationMissing, err.to_string())
    }
}

impl ResolvedConfig {
    /// Complete SFTP settings, or the first missing field
    pub fn sftp_settings(&self) -> Result<SftpSettings, ConfigError> {
        let delivery = &self.delivery;
        Ok(SftpSettings {
            host: delivery
                .host
                .clone()
                .ok_or(ConfigError::Missing("delivery host (SFTP_SERVER)"))?,
            port: delivery.port,
            username: delivery
                .username
                .clone()
                .ok_or(ConfigError::Missing("delivery username (SFTP_USERNAME)"))?,
            password: delivery
                .password
                .clone()
                .ok_or(ConfigError::Missing("delivery password (SFTP_PASSWORD)"))?,
            base_directory: delivery.base_directory.clone(),
        })
    }

    /// Locate the capture tool: an existing file, or a program on `PATH`
    pub fn capture_binary(&self) -> Result<PathBuf, ConfigError> {
        let binary = Path::new(&self.capture.binary);
        if binary.components().count() > 1 || binary.is_absolute() {
            return if binary.is_file() {
                Ok(binary.to_path_buf())
            } else {
                Err(ConfigError::ToolNotFound(self.capture.binary.clone()))
            };
        }

        std::env::var_os("PATH")
            .and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(binary))
                    .find(|candidate| candidate.is_file())
            })
            .ok_or_else(|| ConfigError::ToolNotFound(self.capture.binary.clone()))
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".snapbundle").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("snapbundle")
}

/// Load configuration from the process environment and the discovered file
pub fn load_config() -> Result<ResolvedConfig> {
    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve_config(file, |key| std::env::var(key).ok())
}

/// Merge an optional config file with environment lookups and defaults.
///
/// Empty environment values count as unset.
pub fn resolve_config<F>(file: Option<(PathBuf, ConfigFile)>, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    let first_env = |keys: &[&str]| keys.iter().find_map(|&key| env(key));

    let (config_file, file) = match file {
        Some((path, file)) => (Some(path), file),
        None => (None, ConfigFile::default()),
    };

    // Project root is the parent of .snapbundle/
    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let source_url = env("SNAPBUNDLE_SOURCE_URL")
        .or(file.source.url)
        .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

    let binary = match env("SNAPBUNDLE_CAPTURE_BIN") {
        Some(binary) => binary,
        None => match file.capture.binary {
            // Only path-like values are relative to the project root
            Some(binary) if binary.contains('/') => {
                resolve_path(&base_dir, &binary).to_string_lossy().into_owned()
            }
            Some(binary) => binary,
            None => DEFAULT_BINARY.to_string(),
        },
    };

    let capture = CaptureSettings {
        binary,
        width: file.capture.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
        grace_period: file
            .capture
            .grace_period_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GRACE_PERIOD),
        script: file.capture.script,
    };

    let work_dir = match env("SNAPBUNDLE_WORK_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => match file.work_dir {
            Some(ref dir) => resolve_path(&base_dir, dir),
            None => default_work_dir(),
        },
    };

    let port = match env("SFTP_PORT") {
        Some(port) => port
            .trim()
            .parse()
            .with_context(|| format!("Invalid SFTP_PORT: {}", port))?,
        None => file.delivery.port.unwrap_or(DEFAULT_PORT),
    };

    let delivery = DeliveryConfig {
        host: first_env(&["SFTP_SERVER", "SFTP_SERVEUR"]).or(file.delivery.host),
        port,
        username: first_env(&["SFTP_USERNAME", "SFTP_LOGIN"]).or(file.delivery.username),
        password: env("SFTP_PASSWORD").or(file.delivery.password),
        base_directory: env("SFTP_DIRECTORY")
            .or(file.delivery.base_directory)
            .unwrap_or_else(|| DEFAULT_BASE_DIRECTORY.to_string()),
    };

    let naming = NamingSettings {
        archive_prefix: file
            .naming
            .archive_prefix
            .unwrap_or_else(|| "capture".to_string()),
        download_url_template: file.naming.download_url_template,
    };

    Ok(ResolvedConfig {
        source_url,
        capture,
        work_dir,
        delivery,
        naming,
        config_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, env_from(&[])).unwrap();

        assert_eq!(config.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(config.capture.binary, "shot-scraper");
        assert_eq!(config.capture.width, 1030);
        assert_eq!(config.capture.grace_period, Duration::from_secs(5));
        assert_eq!(config.delivery.port, 22);
        assert_eq!(config.delivery.base_directory, "/uploads");
        assert_eq!(config.naming.archive_prefix, "capture");
        assert!(config.work_dir.ends_with("snapbundle"));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let config = resolve_config(None, env_from(&[("SFTP_SERVER", "sftp.example.org")])).unwrap();
        let err = config.sftp_settings().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(field) if field.contains("username")));

        let run_err: RunError = err.into();
        assert_eq!(run_err.kind, ErrorKind::ConfigurationMissing);
    }

    #[test]
    fn test_env_aliases() {
        let config = resolve_config(
            None,
            env_from(&[
                ("SFTP_SERVEUR", "sftp.example.org"),
                ("SFTP_LOGIN", "capture"),
                ("SFTP_PASSWORD", "secret"),
                ("SFTP_PORT", "2222"),
                ("SFTP_DIRECTORY", "/drop"),
            ]),
        )
        .unwrap();

        let sftp = config.sftp_settings().unwrap();
        assert_eq!(sftp.host, "sftp.example.org");
        assert_eq!(sftp.username, "capture");
        assert_eq!(sftp.password, "secret");
        assert_eq!(sftp.port, 2222);
        assert_eq!(sftp.base_directory, "/drop");
    }

    #[test]
    fn test_empty_env_counts_as_unset() {
        let config = resolve_config(None, env_from(&[("SFTP_SERVER", "  ")])).unwrap();
        assert!(config.delivery.host.is_none());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = resolve_config(None, env_from(&[("SFTP_PORT", "ssh")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_parsing_and_precedence() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".snapbundle");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
source:
  url: http://localhost:9999/export.php
capture:
  binary: ./bin/shot-scraper
  width: 1280
  grace_period_seconds: 2
work_dir: work
delivery:
  host: file-host
  username: capture
  password: from-file
naming:
  archive_prefix: LeFigaro
  download_url_template: "https://example.org/?{{filter}}"
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));

        let config = resolve_config(
            Some((config_path.clone(), parsed)),
            env_from(&[("SFTP_PASSWORD", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.source_url, "http://localhost:9999/export.php");
        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.capture.grace_period, Duration::from_secs(2));
        assert_eq!(
            PathBuf::from(&config.capture.binary),
            temp.path().join("./bin/shot-scraper")
        );
        assert_eq!(config.work_dir, temp.path().join("work"));
        assert_eq!(config.naming.archive_prefix, "LeFigaro");
        assert_eq!(
            config.naming.download_url_template.as_deref(),
            Some("https://example.org/?{filter}")
        );
        assert_eq!(config.config_file, Some(config_path));

        // Environment wins over the file
        let sftp = config.sftp_settings().unwrap();
        assert_eq!(sftp.host, "file-host");
        assert_eq!(sftp.password, "from-env");
    }

    #[test]
    fn test_capture_binary_resolution() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("shot-scraper");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();

        let mut config = resolve_config(None, env_from(&[])).unwrap();

        config.capture.binary = tool.to_string_lossy().into_owned();
        assert_eq!(config.capture_binary().unwrap(), tool);

        config.capture.binary = temp.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(
            config.capture_binary(),
            Err(ConfigError::ToolNotFound(_))
        ));

        config.capture.binary = "snapbundle-no-such-tool-on-path".to_string();
        assert!(matches!(
            config.capture_binary(),
            Err(ConfigError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_delivery_debug_redacts_password() {
        let config = resolve_config(None, env_from(&[("SFTP_PASSWORD", "hunter2")])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }
}
