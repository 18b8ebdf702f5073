#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use console_backup::adapters::SimulatedRemote;
use console_backup::core::notifications::{NotificationChannel, NotifyError};
use console_backup::core::{
    BackupExecutor, BackupRunner, Clock, ConnectionParams, Credential, ManualClock, RetryPolicy,
    RunnerOptions, ScheduleSpec, SchedulerCommand, SchedulerHandle,
};
use console_backup::db::HistoryStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const REMOTE_DIR: &str = "/data/unifi/data/backup/autobackup";

pub fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
}

/// Moves forward by `step` every time it is read, like a slow transfer would.
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        let current = *now;
        *now = current + self.step;
        current
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        if self.fail {
            return Err(NotifyError::NotConfigured);
        }
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub remote: SimulatedRemote,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub commands: UnboundedReceiver<SchedulerCommand>,
    pub runner: Arc<BackupRunner>,
}

pub struct HarnessOptions {
    pub retry: bool,
    pub send_report: bool,
    pub start: DateTime<Utc>,
    pub timezone: Tz,
    pub notifier: RecordingNotifier,
    /// Replaces the manual clock as the runner's time source.
    pub clock: Option<Arc<dyn Clock>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            retry: true,
            send_report: true,
            start: utc(10, 0),
            timezone: Tz::UTC,
            notifier: RecordingNotifier::default(),
            clock: None,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = SimulatedRemote::new();
        let clock = Arc::new(ManualClock::new(options.start));
        let runner_clock: Arc<dyn Clock> = options
            .clock
            .unwrap_or_else(|| clock.clone() as Arc<dyn Clock>);
        let notifier = Arc::new(options.notifier);

        let executor = BackupExecutor::new(
            Arc::new(remote.clone()),
            ConnectionParams {
                host: "192.0.2.10".into(),
                port: 22,
                user: "root".into(),
                credential: Credential::new("secret"),
            },
            REMOTE_DIR,
            dir.path().join("backups"),
        );
        let history = HistoryStore::load(dir.path().join("history.json")).unwrap();
        let (handle, commands) = SchedulerHandle::channel();

        let runner = BackupRunner::new(
            executor,
            history,
            ScheduleSpec::new(22, 30, options.timezone).unwrap(),
            handle,
            RunnerOptions {
                retry: RetryPolicy::new(options.retry, 30),
                send_report: options.send_report,
                client_name: "Acme".into(),
            },
        )
        .with_clock(runner_clock)
        .with_notifier(Some(notifier.clone() as Arc<dyn NotificationChannel>));

        Self {
            dir,
            remote,
            clock,
            notifier,
            commands,
            runner: Arc::new(runner),
        }
    }

    pub fn day_dir(&self, date: &str) -> PathBuf {
        self.dir.path().join("backups").join(date)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.path().join("history.json")
    }

    pub fn drain_commands(&mut self) -> Vec<SchedulerCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }
}

pub fn list_dir(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
