//! SFTP delivery of the finished archive.
//!
//! One connection per upload. The archive lands in
//! `<base_directory>/<current year>/<file name>`; the year directory is
//! created on demand. The session is closed on every path once
//! authentication succeeded. Connecting and every blocking SSH call are
//! bounded by the delivery timeout, so a stalled server fails the upload
//! instead of hanging it.

use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local};
use ssh2::{Session, Sftp};
use tracing::{debug, info, instrument, warn};

use super::{DeliveryClient, DeliveryError};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default bound on connecting and on each blocking SSH operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default remote base directory
pub const DEFAULT_BASE_DIRECTORY: &str = "/uploads";

/// Connection settings for the remote store
#[derive(Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub base_directory: String,
}

impl std::fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_directory", &self.base_directory)
            .finish()
    }
}

/// Remote directory for uploads made during `year`
pub fn remote_directory(base_directory: &str, year: i32) -> String {
    let base = base_directory.trim_end_matches('/');
    if base.is_empty() && base_directory.starts_with('/') {
        format!("/{}", year)
    } else if base.is_empty() {
        year.to_string()
    } else {
        format!("{}/{}", base, year)
    }
}

/// Delivery client uploading over SFTP
pub struct SftpDelivery {
    settings: SftpSettings,
    timeout: Duration,
}

impl SftpDelivery {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn settings(&self) -> &SftpSettings {
        &self.settings
    }
}

#[async_trait]
impl DeliveryClient for SftpDelivery {
    #[instrument(skip(self, local_path), fields(host = %self.settings.host))]
    async fn deliver(&self, local_path: &Path, file_name: &str) -> Result<String, DeliveryError> {
        let settings = self.settings.clone();
        let timeout = self.timeout;
        let local_path = local_path.to_path_buf();
        let remote_dir = remote_directory(&settings.base_directory, Local::now().year());
        let remote_path = format!("{}/{}", remote_dir, file_name);

        let remote = tokio::task::spawn_blocking(move || {
            upload_blocking(&settings, timeout, &local_path, &remote_dir, &remote_path)
        })
        .await
        .map_err(|e| DeliveryError::Task(e.to_string()))??;

        info!(remote_path = %remote, "Archive delivered");
        Ok(remote)
    }
}

/// Connect, authenticate, upload, and always disconnect
fn upload_blocking(
    settings: &SftpSettings,
    timeout: Duration,
    local_path: &Path,
    remote_dir: &str,
    remote_path: &str,
) -> Result<String, DeliveryError> {
    let connect_err = |message: String| DeliveryError::Connect {
        host: settings.host.clone(),
        message,
    };

    let tcp = connect(&settings.host, settings.port, timeout)
        .map_err(|e| connect_err(e.to_string()))?;
    let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| connect_err(e.to_string()))?;

    let outcome = authenticate(&session, settings)
        .and_then(|()| transfer(&session, local_path, remote_dir, remote_path));

    if let Err(e) = session.disconnect(None, "upload finished", None) {
        warn!(error = %e, "Failed to close delivery connection");
    }

    outcome
}

/// Open a TCP connection to the first reachable address of `host`
fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
    }))
}

fn authenticate(session: &Session, settings: &SftpSettings) -> Result<(), DeliveryError> {
    let auth_err = |message: String| DeliveryError::Auth {
        username: settings.username.clone(),
        message,
    };

    session
        .userauth_password(&settings.username, &settings.password)
        .map_err(|e| auth_err(e.to_string()))?;

    if !session.authenticated() {
        return Err(auth_err("server rejected credentials".to_string()));
    }
    Ok(())
}

fn transfer(
    session: &Session,
    local_path: &Path,
    remote_dir: &str,
    remote_path: &str,
) -> Result<String, DeliveryError> {
    let upload_err = |message: String| DeliveryError::Upload {
        path: remote_path.to_string(),
        message,
    };

    let sftp = session.sftp().map_err(|e| upload_err(e.to_string()))?;
    ensure_directory(&sftp, remote_dir)?;

    let mut local = File::open(local_path)
        .map_err(|e| upload_err(format!("{}: {}", local_path.display(), e)))?;
    let mut remote = sftp
        .create(Path::new(remote_path))
        .map_err(|e| upload_err(e.to_string()))?;

    let bytes = std::io::copy(&mut local, &mut remote).map_err(|e| upload_err(e.to_string()))?;
    debug!(bytes, remote_path, "Upload finished");

    Ok(remote_path.to_string())
}

/// Create `dir` and its missing parents. Existing directories are fine.
fn ensure_directory(sftp: &Sftp, dir: &str) -> Result<(), DeliveryError> {
    let mut current = if dir.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };

    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);

        let path = Path::new(&current);
        if sftp.stat(path).is_ok() {
            continue;
        }

        if let Err(e) = sftp.mkdir(path, 0o755) {
            // Lost a race with another uploader, or the server hides stat
            if sftp.stat(path).is_err() {
                return Err(DeliveryError::Directory {
                    path: current.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}
