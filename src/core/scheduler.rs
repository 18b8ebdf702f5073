//! The scheduler task: owns the trigger registry and hands firings to workers.
//!
//! All trigger mutations arrive as commands over a channel and are applied on
//! the scheduler's own task, so swapping the daily trigger or replacing the
//! retry can never race with a firing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::models::TriggerOrigin;
use super::schedule::{JobRegistry, JobRole, ScheduleSpec};

/// Longest the loop sleeps before re-reading the wall clock.
const MAX_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    Reschedule(ScheduleSpec),
    ArmRetry(DateTime<Utc>),
    CancelRetry,
    Shutdown,
}

/// Work the scheduler invokes when a trigger fires.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn fire(&self, origin: TriggerOrigin);
}

/// Cheap, cloneable way to talk to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// A handle plus the receiving end, for wiring the scheduler (or a test) by hand.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn reschedule(&self, spec: ScheduleSpec) {
        self.send(SchedulerCommand::Reschedule(spec));
    }

    pub fn arm_retry(&self, at: DateTime<Utc>) {
        self.send(SchedulerCommand::ArmRetry(at));
    }

    pub fn cancel_retry(&self) {
        self.send(SchedulerCommand::CancelRetry);
    }

    pub fn shutdown(&self) {
        self.send(SchedulerCommand::Shutdown);
    }

    fn send(&self, cmd: SchedulerCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("Scheduler is not running, command dropped");
        }
    }
}

pub struct Scheduler {
    registry: JobRegistry,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Build a scheduler with the daily trigger already installed.
    pub fn new(spec: ScheduleSpec, clock: Arc<dyn Clock>) -> (Self, SchedulerHandle) {
        let (handle, rx) = SchedulerHandle::channel();
        (Self::from_channel(spec, clock, rx), handle)
    }

    pub fn from_channel(
        spec: ScheduleSpec,
        clock: Arc<dyn Clock>,
        rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    ) -> Self {
        let mut registry = JobRegistry::new();
        let next = registry.install_daily(spec, clock.now());
        info!(schedule = %spec, next = %next, "Daily backup scheduled");
        Self {
            registry,
            rx,
            clock,
        }
    }

    pub fn spawn(self, job: Arc<dyn ScheduledJob>) -> JoinHandle<()> {
        tokio::spawn(self.run(job))
    }

    async fn run(mut self, job: Arc<dyn ScheduledJob>) {
        info!("Scheduler started");

        loop {
            let now = self.clock.now();

            for role in self.registry.take_due(now) {
                let origin = match role {
                    JobRole::Daily => TriggerOrigin::Scheduled,
                    JobRole::Retry => TriggerOrigin::Retry,
                };
                info!(role = ?role, "Trigger fired");
                let job = Arc::clone(&job);
                tokio::spawn(async move { job.fire(origin).await });
            }

            let wait = self
                .registry
                .next_due()
                .and_then(|(_, at)| (at - now).to_std().ok())
                .map_or(MAX_SLEEP, |d| d.min(MAX_SLEEP));

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(cmd) => self.apply(cmd),
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Scheduler stopped");
    }

    fn apply(&mut self, cmd: SchedulerCommand) {
        let now = self.clock.now();
        match cmd {
            SchedulerCommand::Reschedule(spec) => {
                // Drop every trigger for the old schedule before installing the new one.
                self.registry.remove(JobRole::Daily);
                let next = self.registry.install_daily(spec, now);
                info!(schedule = %spec, next = %next, "Daily backup rescheduled");
            }
            SchedulerCommand::ArmRetry(at) => {
                if let Some(previous) = self.registry.install_retry(at) {
                    debug!(previous = %previous, "Replaced pending retry");
                }
                info!(at = %at, "Retry scheduled");
            }
            SchedulerCommand::CancelRetry => {
                if self.registry.remove(JobRole::Retry) {
                    info!("Pending retry cancelled");
                }
            }
            SchedulerCommand::Shutdown => {
                warn!("Shutdown must be handled by the run loop");
            }
        }
    }

    #[cfg(test)]
    fn registry(&self) -> &JobRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{ManualClock, SystemClock};
    use chrono::{TimeZone, Timelike};
    use chrono_tz::Tz;
    use std::sync::Mutex;
    use tokio::time::timeout;

    struct Recorder {
        fired: Mutex<Vec<TriggerOrigin>>,
        notify: mpsc::UnboundedSender<TriggerOrigin>,
        fail: bool,
    }

    impl Recorder {
        fn new(notify: mpsc::UnboundedSender<TriggerOrigin>) -> Self {
            Self {
                fired: Mutex::new(Vec::new()),
                notify,
                fail: false,
            }
        }

        fn failing(notify: mpsc::UnboundedSender<TriggerOrigin>) -> Self {
            Self {
                fail: true,
                ..Self::new(notify)
            }
        }
    }

    #[async_trait]
    impl ScheduledJob for Recorder {
        async fn fire(&self, origin: TriggerOrigin) {
            self.fired.lock().unwrap().push(origin);
            let _ = self.notify.send(origin);
            if self.fail {
                panic!("job blew up");
            }
        }
    }

    #[test]
    fn commands_mutate_registry() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        ));
        let spec = ScheduleSpec::new(22, 30, Tz::UTC).unwrap();
        let (mut scheduler, _handle) = Scheduler::new(spec, clock);

        let first = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 15, 10, 40, 0).unwrap();
        scheduler.apply(SchedulerCommand::ArmRetry(first));
        scheduler.apply(SchedulerCommand::ArmRetry(second));
        assert_eq!(scheduler.registry().next_fire(JobRole::Retry), Some(second));
        assert_eq!(scheduler.registry().len(), 2);

        scheduler.apply(SchedulerCommand::Reschedule(ScheduleSpec::new(6, 0, Tz::UTC).unwrap()));
        assert_eq!(
            scheduler.registry().next_fire(JobRole::Daily),
            Some(Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap())
        );

        scheduler.apply(SchedulerCommand::CancelRetry);
        assert_eq!(scheduler.registry().next_fire(JobRole::Retry), None);
        assert_eq!(scheduler.registry().len(), 1);
    }

    #[tokio::test]
    async fn retry_fires_once_and_shutdown_stops_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::new(tx));

        let clock = Arc::new(SystemClock);
        let far = Utc::now() + chrono::Duration::hours(3);
        let spec = ScheduleSpec::new(far.hour(), far.minute(), Tz::UTC).unwrap();
        let (scheduler, handle) = Scheduler::new(spec, clock);
        let task = scheduler.spawn(recorder.clone());

        handle.arm_retry(Utc::now() + chrono::Duration::milliseconds(100));

        let origin = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("retry did not fire")
            .expect("recorder dropped");
        assert_eq!(origin, TriggerOrigin::Retry);

        // Nothing else is due for hours.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        handle.shutdown();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert_eq!(recorder.fired.lock().unwrap().as_slice(), &[TriggerOrigin::Retry]);
    }

    #[tokio::test]
    async fn cancelled_retry_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::new(tx));

        let (scheduler, handle) = Scheduler::new(
            ScheduleSpec::new(3, 0, Tz::Pacific__Kiritimati).unwrap(),
            Arc::new(SystemClock),
        );
        let task = scheduler.spawn(recorder);

        handle.arm_retry(Utc::now() + chrono::Duration::milliseconds(200));
        handle.cancel_retry();

        assert!(timeout(Duration::from_millis(600), rx.recv()).await.is_err());

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn daily_trigger_keeps_firing_after_a_failed_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::failing(tx));

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        ));
        let spec = ScheduleSpec::new(22, 30, Tz::UTC).unwrap();
        let (scheduler, handle) = Scheduler::new(spec, clock.clone());
        let task = scheduler.spawn(recorder.clone());

        // Any command wakes the loop so it re-reads the manual clock.
        clock.set(Utc.with_ymd_and_hms(2024, 1, 15, 22, 30, 0).unwrap());
        handle.cancel_retry();
        let first = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("daily trigger did not fire")
            .expect("recorder dropped");
        assert_eq!(first, TriggerOrigin::Scheduled);

        // Same instant again: already advanced to tomorrow.
        handle.cancel_retry();
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        clock.set(Utc.with_ymd_and_hms(2024, 1, 16, 22, 30, 0).unwrap());
        handle.cancel_retry();
        let second = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("scheduler stopped after a failed job")
            .expect("recorder dropped");
        assert_eq!(second, TriggerOrigin::Scheduled);

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(recorder.fired.lock().unwrap().len(), 2);
    }
}
