use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::BackupError;

/// Outcome of one execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResult {
    pub success: bool,
    pub message: String,
    pub filename: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BackupResult {
    pub fn succeeded(filename: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            message: "Backup successful".to_string(),
            filename: Some(filename),
            timestamp,
        }
    }

    pub fn failed(error: &BackupError, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            filename: None,
            timestamp,
        }
    }
}

/// A file that made it to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedBackup {
    /// Name on the console.
    pub remote_name: String,
    /// Name under the per-day directory; differs when a same-named file was already there.
    pub local_name: String,
    pub bytes: u64,
}

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOrigin {
    Scheduled,
    Retry,
    Manual,
}

impl fmt::Display for TriggerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::Manual => "manual",
        })
    }
}
