pub mod clock;
pub mod error;
pub mod executor;
pub mod locator;
pub mod models;
pub mod notifications;
pub mod remote;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::BackupError;
pub use executor::BackupExecutor;
pub use locator::select_backup;
pub use models::{BackupResult, DownloadedBackup, TriggerOrigin};
pub use remote::{ConnectionParams, Credential, HostKeyVerifier, RemoteConnector, RemoteSession};
pub use retry::{RetryCoordinator, RetryPolicy, RetryState};
pub use runner::{BackupRunner, RunnerOptions};
pub use schedule::{JobRegistry, JobRole, ScheduleSpec};
pub use scheduler::{ScheduledJob, Scheduler, SchedulerCommand, SchedulerHandle};
pub use status::{StatusSnapshot, StatusTracker};
