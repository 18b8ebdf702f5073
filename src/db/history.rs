use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("history file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write history file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome summary for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Absent until the first success of the day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Success { file: Option<&'a str> },
    Failure { message: &'a str },
}

/// Date (`YYYYMMDD`) to record, rewritten in full on every change.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: BTreeMap<String, HistoryRecord>,
}

impl HistoryStore {
    /// Load the store, starting empty when the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| HistoryError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(HistoryError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };

        info!(path = %path.display(), days = records.len(), "History loaded");
        Ok(Self { path, records })
    }

    /// Apply an outcome to the record for `date` and persist the whole store.
    ///
    /// A failure after a same-day success flips `success` back to false but
    /// keeps the files already pulled that day.
    pub fn record(&mut self, date: &str, outcome: Outcome<'_>) -> Result<(), HistoryError> {
        let entry = self
            .records
            .entry(date.to_string())
            .or_insert_with(|| HistoryRecord {
                success: false,
                message: None,
                files: None,
            });

        match outcome {
            Outcome::Success { file } => {
                entry.success = true;
                entry.message = None;
                let files = entry.files.get_or_insert_with(Vec::new);
                if let Some(file) = file {
                    files.push(file.to_string());
                }
            }
            Outcome::Failure { message } => {
                entry.success = false;
                entry.message = Some(message.to_string());
            }
        }

        self.persist()
    }

    pub fn get(&self, date: &str) -> Option<&HistoryRecord> {
        self.records.get(date)
    }

    /// Newest day first, at most `limit` entries.
    pub fn entries(&self, limit: usize) -> Vec<(String, HistoryRecord)> {
        self.records
            .iter()
            .rev()
            .take(limit)
            .map(|(date, record)| (date.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, sync, then rename over the real one.
    fn persist(&self) -> Result<(), HistoryError> {
        let content = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        let write_err = |source| HistoryError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut file = fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), days = self.records.len(), "History saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn failure_only_record_has_no_files_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path).unwrap();

        store
            .record("20240115", Outcome::Failure { message: "no backup found for today" })
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"20240115": {"success": false, "message": "no backup found for today"}})
        );
    }

    #[test]
    fn success_after_failure_clears_message() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json")).unwrap();

        store
            .record("20240115", Outcome::Failure { message: "connection failed: timed out" })
            .unwrap();
        store
            .record("20240115", Outcome::Success { file: Some("a_20240115.unf") })
            .unwrap();

        let record = store.get("20240115").unwrap();
        assert!(record.success);
        assert_eq!(record.message, None);
        assert_eq!(record.files.as_deref(), Some(&["a_20240115.unf".to_string()][..]));
    }

    #[test]
    fn files_accumulate_and_failure_keeps_them() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path).unwrap();

        store
            .record("20240115", Outcome::Success { file: Some("a.unf") })
            .unwrap();
        store
            .record("20240115", Outcome::Success { file: Some("103005_a.unf") })
            .unwrap();
        store
            .record("20240115", Outcome::Failure { message: "transfer failed: eof" })
            .unwrap();

        let reloaded = HistoryStore::load(&path).unwrap();
        let record = reloaded.get("20240115").unwrap();
        assert!(!record.success);
        assert_eq!(record.message.as_deref(), Some("transfer failed: eof"));
        assert_eq!(
            record.files,
            Some(vec!["a.unf".to_string(), "103005_a.unf".to_string()])
        );
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn entries_are_newest_first() {
        let dir = tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json")).unwrap();
        for date in ["20240113", "20240115", "20240114"] {
            store.record(date, Outcome::Success { file: None }).unwrap();
        }

        let dates: Vec<String> = store.entries(2).into_iter().map(|(d, _)| d).collect();
        assert_eq!(dates, vec!["20240115", "20240114"]);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            HistoryStore::load(&path),
            Err(HistoryError::Parse { .. })
        ));
    }
}
