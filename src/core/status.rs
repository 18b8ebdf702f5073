//! Most recent execution outcome, for anyone who asks.
//!
//! Only the latest result is kept; the history store is the durable record.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::BackupResult;

/// What external consumers see. Before the first execution this reads
/// "No backup yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub success: bool,
    pub message: String,
    pub filename: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&BackupResult> for StatusSnapshot {
    fn from(result: &BackupResult) -> Self {
        Self {
            success: result.success,
            message: result.message.clone(),
            filename: result.filename.clone(),
            timestamp: Some(result.timestamp),
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            success: false,
            message: "No backup yet".to_string(),
            filename: None,
            timestamp: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct StatusTracker {
    inner: Arc<RwLock<Option<BackupResult>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current value.
    pub async fn set(&self, result: BackupResult) {
        *self.inner.write().await = Some(result);
    }

    pub async fn last_result(&self) -> Option<BackupResult> {
        self.inner.read().await.clone()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .await
            .as_ref()
            .map(StatusSnapshot::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BackupError;
    use chrono::Utc;

    #[tokio::test]
    async fn starts_with_placeholder() {
        let tracker = StatusTracker::new();
        let snapshot = tracker.snapshot().await;
        assert!(!snapshot.success);
        assert_eq!(snapshot.message, "No backup yet");
        assert!(tracker.last_result().await.is_none());
    }

    #[tokio::test]
    async fn latest_result_wins() {
        let tracker = StatusTracker::new();
        tracker
            .set(BackupResult::succeeded("a_20240115.unf".into(), Utc::now()))
            .await;
        tracker
            .set(BackupResult::failed(&BackupError::NotFound, Utc::now()))
            .await;

        let snapshot = tracker.snapshot().await;
        assert!(!snapshot.success);
        assert_eq!(snapshot.message, "no backup found for today");
        assert_eq!(snapshot.filename, None);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let tracker = StatusTracker::new();
        let reader = tracker.clone();
        tracker
            .set(BackupResult::succeeded("b.unf".into(), Utc::now()))
            .await;
        assert_eq!(reader.snapshot().await.filename.as_deref(), Some("b.unf"));
    }
}
