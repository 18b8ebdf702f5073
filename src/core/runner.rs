//! The single execution path shared by the daily trigger, retries and
//! manual "run now" requests.
//!
//! Network work happens on a blocking worker. Everything after it (history,
//! retry arming, status, report) runs under one lock so two executions can
//! never interleave their bookkeeping.

use async_trait::async_trait;
use chrono_tz::Tz;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock, date_key, local_now};
use super::error::BackupError;
use super::executor::BackupExecutor;
use super::models::{BackupResult, DownloadedBackup, TriggerOrigin};
use super::notifications::{NotificationChannel, NotifyError, Report};
use super::retry::{RetryCoordinator, RetryPolicy, RetryState};
use super::schedule::ScheduleSpec;
use super::scheduler::{ScheduledJob, SchedulerHandle};
use super::status::StatusTracker;
use crate::db::{HistoryRecord, HistoryStore, Outcome};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub retry: RetryPolicy,
    pub send_report: bool,
    pub client_name: String,
}

/// State mutated after every execution.
struct Ledger {
    history: HistoryStore,
    retry: RetryCoordinator,
}

pub struct BackupRunner {
    executor: Arc<BackupExecutor>,
    ledger: Mutex<Ledger>,
    status: StatusTracker,
    notifier: Option<Arc<dyn NotificationChannel>>,
    clock: Arc<dyn Clock>,
    schedule: RwLock<ScheduleSpec>,
    scheduler: SchedulerHandle,
    options: RunnerOptions,
}

impl BackupRunner {
    pub fn new(
        executor: BackupExecutor,
        history: HistoryStore,
        schedule: ScheduleSpec,
        scheduler: SchedulerHandle,
        options: RunnerOptions,
    ) -> Self {
        let retry = RetryCoordinator::new(options.retry, scheduler.clone());
        Self {
            executor: Arc::new(executor),
            ledger: Mutex::new(Ledger { history, retry }),
            status: StatusTracker::new(),
            notifier: None,
            clock: Arc::new(SystemClock),
            schedule: RwLock::new(schedule),
            scheduler,
            options,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn NotificationChannel>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_status(mut self, status: StatusTracker) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn schedule(&self) -> ScheduleSpec {
        *self.schedule.read().unwrap_or_else(|e| e.into_inner())
    }

    fn timezone(&self) -> Tz {
        self.schedule().timezone
    }

    /// Swap the daily trigger. "Today" follows the new timezone from here on.
    ///
    /// The command is queued while the write guard is held so the installed
    /// trigger always matches the last stored spec.
    pub fn reschedule(&self, spec: ScheduleSpec) {
        let mut current = self.schedule.write().unwrap_or_else(|e| e.into_inner());
        *current = spec;
        self.scheduler.reschedule(spec);
    }

    pub async fn retry_state(&self) -> RetryState {
        self.ledger.lock().await.retry.state()
    }

    pub async fn history_entries(&self, limit: usize) -> Vec<(String, HistoryRecord)> {
        self.ledger.lock().await.history.entries(limit)
    }

    pub async fn history_record(&self, date: &str) -> Option<HistoryRecord> {
        self.ledger.lock().await.history.get(date).cloned()
    }

    /// Perform one full execution and return its result.
    pub async fn run_now(&self, origin: TriggerOrigin) -> BackupResult {
        let span = info_span!("backup", run_id = %Uuid::now_v7(), origin = %origin);
        self.execute_and_record().instrument(span).await
    }

    async fn execute_and_record(&self) -> BackupResult {
        let tz = self.timezone();
        let started = local_now(self.clock.as_ref(), tz);
        let today = date_key(&started);
        info!(date = %today, "Starting backup");

        let outcome = self.pull(started).await;

        let finished = local_now(self.clock.as_ref(), tz);
        let result = match &outcome {
            Ok(download) => BackupResult::succeeded(download.remote_name.clone(), finished.to_utc()),
            Err(e) => BackupResult::failed(e, finished.to_utc()),
        };

        let mut ledger = self.ledger.lock().await;

        let history_outcome = match &outcome {
            Ok(download) => Outcome::Success {
                file: Some(download.local_name.as_str()),
            },
            Err(_) => Outcome::Failure {
                message: &result.message,
            },
        };
        if let Err(e) = ledger.history.record(&today, history_outcome) {
            error!(error = %e, "Failed to persist backup history");
        }

        match &outcome {
            Ok(download) => {
                info!(file = %download.local_name, bytes = download.bytes, "Backup successful");
                ledger.retry.on_success();
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Backup failed");
                ledger.retry.on_failure(&started);
            }
        }

        self.status.set(result.clone()).await;

        if self.options.send_report {
            let report = match &outcome {
                Ok(download) => Report::Succeeded {
                    client: self.options.client_name.clone(),
                    filename: download.remote_name.clone(),
                },
                Err(e) => Report::Failed {
                    client: self.options.client_name.clone(),
                    error: e.to_string(),
                },
            };
            self.notify(&report).await;
        }

        drop(ledger);
        result
    }

    async fn pull(
        &self,
        now: chrono::DateTime<Tz>,
    ) -> Result<DownloadedBackup, BackupError> {
        let executor = Arc::clone(&self.executor);
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| executor.execute(&now)))
            .await
            .unwrap_or_else(|e| Err(BackupError::Interrupted(e.to_string())))
    }

    /// Best effort; a failed report never fails the backup.
    async fn notify(&self, report: &Report) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.send_report(report).await {
            error!(error = %e, "Failed to send report");
        }
    }

    /// Connect and authenticate only. Errors are surfaced unchanged.
    pub async fn test_connection(&self) -> Result<(), BackupError> {
        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || executor.check_connection())
            .await
            .unwrap_or_else(|e| Err(BackupError::Interrupted(e.to_string())))
    }

    /// Send the test report. Errors are surfaced unchanged.
    pub async fn test_notification(&self) -> Result<(), NotifyError> {
        let notifier = self.notifier.as_ref().ok_or(NotifyError::NotConfigured)?;
        notifier
            .send_report(&Report::Test {
                client: self.options.client_name.clone(),
            })
            .await
    }
}

#[async_trait]
impl ScheduledJob for BackupRunner {
    async fn fire(&self, origin: TriggerOrigin) {
        self.run_now(origin).await;
    }
}
