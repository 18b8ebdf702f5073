use std::io;
use thiserror::Error;

/// Everything that can go wrong while pulling a backup off the console.
///
/// The runner turns these into a failed `BackupResult`; only strict callers
/// such as `test-connection` ever see them directly.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("host key for {host} does not match the recorded fingerprint")]
    HostKeyMismatch { host: String },

    #[error("cannot list remote directory: {0}")]
    DirectoryList(String),

    #[error("no backup found for today")]
    NotFound,

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("local storage error: {0}")]
    LocalStorage(#[from] io::Error),

    #[error("backup worker interrupted: {0}")]
    Interrupted(String),
}

impl BackupError {
    /// Short machine-friendly tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Authentication(_) => "authentication",
            Self::HostKeyMismatch { .. } => "host_key",
            Self::DirectoryList(_) => "directory_list",
            Self::NotFound => "not_found",
            Self::Transfer(_) => "transfer",
            Self::LocalStorage(_) => "local_storage",
            Self::Interrupted(_) => "interrupted",
        }
    }
}
