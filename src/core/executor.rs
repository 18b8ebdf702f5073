//! Pulls today's backup from the console into the local per-day directory.
//!
//! Everything here is blocking; callers run it under `spawn_blocking`.

use chrono::DateTime;
use chrono_tz::Tz;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::date_key;
use super::error::BackupError;
use super::locator::select_backup;
use super::models::DownloadedBackup;
use super::remote::{ConnectionParams, RemoteConnector, RemoteSession, remote_path};

/// Buffer size for the download stream (128KB)
const BUFFER_SIZE: usize = 128 * 1024;

/// Upper bound on numbered fallbacks when the stamped name is also taken.
const MAX_NAME_ATTEMPTS: u32 = 999;

pub struct BackupExecutor {
    connector: Arc<dyn RemoteConnector>,
    params: ConnectionParams,
    remote_dir: String,
    backup_root: PathBuf,
}

impl BackupExecutor {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        params: ConnectionParams,
        remote_dir: impl Into<String>,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            params,
            remote_dir: remote_dir.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Run one full retrieval for the local day of `now`.
    ///
    /// The session is closed on every path once it has been opened.
    pub fn execute(&self, now: &DateTime<Tz>) -> Result<DownloadedBackup, BackupError> {
        let today = date_key(now);

        info!(host = %self.params.address(), "Connecting to console");
        let mut session = self.connector.connect(&self.params)?;
        info!("Connection established");

        let result = self.pull(session.as_mut(), &today, now);

        session.close();
        info!("Connection closed");

        result
    }

    /// Connect and authenticate, then hang up. Errors are returned as-is.
    pub fn check_connection(&self) -> Result<(), BackupError> {
        info!(host = %self.params.address(), "Testing connection");
        let mut session = self.connector.connect(&self.params)?;
        session.close();
        info!("Connection test successful");
        Ok(())
    }

    fn pull(
        &self,
        session: &mut dyn RemoteSession,
        today: &str,
        now: &DateTime<Tz>,
    ) -> Result<DownloadedBackup, BackupError> {
        let listing = session.list_dir(&self.remote_dir)?;
        debug!(entries = listing.len(), dir = %self.remote_dir, "Listed remote directory");

        let remote_name =
            select_backup(listing.iter().map(String::as_str), today).ok_or(BackupError::NotFound)?;

        let day_dir = self.backup_root.join(today);
        fs::create_dir_all(&day_dir)?;

        let source = remote_path(&self.remote_dir, &remote_name);
        info!(remote = %source, dir = %day_dir.display(), "Downloading backup");

        let reader = session.open(&source)?;
        let part = day_dir.join(format!(".{}.{}.part", remote_name, Uuid::now_v7()));

        let bytes = match write_part(reader, &part) {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&part);
                return Err(e);
            }
        };

        let local_name = finalize(&part, &day_dir, &remote_name, now)?;
        info!(file = %local_name, bytes, "Download complete");

        Ok(DownloadedBackup {
            remote_name,
            local_name,
            bytes,
        })
    }
}

/// Stream the remote file into `part`, flushing and syncing before returning.
fn write_part(mut reader: Box<dyn Read + Send>, part: &Path) -> Result<u64, BackupError> {
    let file = File::create(part)?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(BackupError::Transfer(e.to_string())),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(total)
}

/// Move the finished download under a name nobody else holds.
fn finalize(
    part: &Path,
    day_dir: &Path,
    remote_name: &str,
    now: &DateTime<Tz>,
) -> Result<String, BackupError> {
    let local_name = match reserve_local_name(day_dir, remote_name, now) {
        Ok(name) => name,
        Err(e) => {
            discard(part);
            return Err(e.into());
        }
    };

    let target = day_dir.join(&local_name);
    if let Err(e) = fs::rename(part, &target) {
        // Release the claimed name along with the download.
        discard(&target);
        discard(part);
        return Err(e.into());
    }
    Ok(local_name)
}

/// Remove a leftover file, logging anything other than "already gone".
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(error = %e, path = %path.display(), "Failed to remove leftover file");
        }
    }
}

/// Claim the first free name: the remote name itself, then `HHMMSS_<name>`,
/// then `HHMMSS_<n>_<name>`. The claim is an exclusive create so concurrent
/// runs cannot pick the same file.
pub fn reserve_local_name(dir: &Path, name: &str, now: &DateTime<Tz>) -> io::Result<String> {
    let stamp = now.format("%H%M%S").to_string();
    let candidates = std::iter::once(name.to_string())
        .chain(std::iter::once(format!("{}_{}", stamp, name)))
        .chain((1..=MAX_NAME_ATTEMPTS).map(|n| format!("{}_{}_{}", stamp, n, name)));

    for candidate in candidates {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free local name for {}", name),
    ))
}
