use anyhow::{Context, Result};
use std::sync::Arc;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::notifications::create_notifier;
use crate::core::{BackupExecutor, BackupRunner, Scheduler, SchedulerHandle, StatusTracker};
use crate::db::HistoryStore;

/// Everything a running daemon shares between the scheduler, the HTTP API
/// and the CLI commands.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub runner: Arc<BackupRunner>,
    pub status: StatusTracker,
    pub scheduler: SchedulerHandle,
}

impl AppContext {
    /// Wire up the runner. The returned scheduler is not started yet.
    pub fn build(config: AppConfig) -> Result<(Self, Scheduler)> {
        let spec = config.schedule_spec()?;
        let history = HistoryStore::load(&config.history_file)
            .with_context(|| format!("Failed to load {}", config.history_file.display()))?;
        let connector =
            adapters::get_connector(&config).context("Failed to set up remote connector")?;

        let executor = BackupExecutor::new(
            connector,
            config.connection_params(),
            config.remote_dir.clone(),
            config.backup_root.clone(),
        );

        let clock: Arc<dyn crate::core::Clock> = Arc::new(crate::core::SystemClock);
        let (scheduler, handle) = Scheduler::new(spec, Arc::clone(&clock));
        let status = StatusTracker::new();

        let runner = BackupRunner::new(
            executor,
            history,
            spec,
            handle.clone(),
            config.runner_options(),
        )
        .with_notifier(create_notifier(&config))
        .with_clock(clock)
        .with_status(status.clone());

        let ctx = Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
            status,
            scheduler: handle,
        };

        Ok((ctx, scheduler))
    }
}
