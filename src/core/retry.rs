//! Same-day retry after a failed execution.
//!
//! The coordinator is either idle or armed with exactly one pending retry.
//! It never holds two: arming sends a single replace command to the
//! scheduler, and any success cancels unconditionally.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use super::scheduler::SchedulerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RetryState {
    Idle,
    Armed { scheduled_for: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Arm(DateTime<Tz>),
    /// The retry would land on the next calendar day.
    CrossesMidnight(DateTime<Tz>),
}

/// Decide where a retry for a failure at `now` would go.
pub fn plan_retry(now: &DateTime<Tz>, delay: Duration) -> RetryDecision {
    let next = *now + delay;
    if next.date_naive() == now.date_naive() {
        RetryDecision::Arm(next)
    } else {
        RetryDecision::CrossesMidnight(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(enabled: bool, delay_minutes: u32) -> Self {
        Self {
            enabled,
            delay: Duration::minutes(i64::from(delay_minutes)),
        }
    }
}

pub struct RetryCoordinator {
    policy: RetryPolicy,
    state: RetryState,
    scheduler: SchedulerHandle,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy, scheduler: SchedulerHandle) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            scheduler,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Any success, from any trigger, disarms.
    pub fn on_success(&mut self) {
        self.scheduler.cancel_retry();
        if let RetryState::Armed { scheduled_for } = self.state {
            info!(was_scheduled_for = %scheduled_for, "Pending retry disarmed after success");
        }
        self.state = RetryState::Idle;
    }

    pub fn on_failure(&mut self, now: &DateTime<Tz>) -> RetryState {
        if !self.policy.enabled {
            return self.state;
        }

        match plan_retry(now, self.policy.delay) {
            RetryDecision::Arm(next) => {
                let at = next.with_timezone(&Utc);
                self.scheduler.arm_retry(at);
                self.state = RetryState::Armed { scheduled_for: at };
                info!(at = %next.to_rfc3339(), "Scheduled retry");
            }
            RetryDecision::CrossesMidnight(next) => {
                self.scheduler.cancel_retry();
                self.state = RetryState::Idle;
                warn!(would_be = %next.to_rfc3339(), "Next day reached, retry aborted");
            }
        }

        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::SchedulerCommand;
    use chrono::TimeZone;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn local(h: u32, m: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<SchedulerCommand>) -> Vec<SchedulerCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn coordinator(enabled: bool) -> (RetryCoordinator, UnboundedReceiver<SchedulerCommand>) {
        let (handle, rx) = SchedulerHandle::channel();
        (RetryCoordinator::new(RetryPolicy::new(enabled, 30), handle), rx)
    }

    #[test]
    fn plan_stays_within_the_day() {
        let delay = Duration::minutes(30);
        assert_eq!(plan_retry(&local(10, 0), delay), RetryDecision::Arm(local(10, 30)));
        assert_eq!(plan_retry(&local(23, 29), delay), RetryDecision::Arm(local(23, 59)));
        assert!(matches!(
            plan_retry(&local(23, 50), delay),
            RetryDecision::CrossesMidnight(_)
        ));
    }

    #[test]
    fn plan_uses_local_calendar() {
        // 14:50 UTC is 23:50 in Tokyo, so a 30 minute retry crosses midnight there.
        let tokyo = Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 50, 0)
            .unwrap()
            .with_timezone(&Tz::Asia__Tokyo);
        assert!(matches!(
            plan_retry(&tokyo, Duration::minutes(30)),
            RetryDecision::CrossesMidnight(_)
        ));
    }

    #[test]
    fn failure_arms_retry() {
        let (mut retry, mut rx) = coordinator(true);
        let state = retry.on_failure(&local(10, 0));

        let expected = local(10, 30).with_timezone(&Utc);
        assert_eq!(state, RetryState::Armed { scheduled_for: expected });
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SchedulerCommand::ArmRetry(at)] if *at == expected
        ));
    }

    #[test]
    fn second_failure_replaces_the_first() {
        let (mut retry, mut rx) = coordinator(true);
        retry.on_failure(&local(10, 0));
        retry.on_failure(&local(10, 10));

        let expected = local(10, 40).with_timezone(&Utc);
        assert_eq!(retry.state(), RetryState::Armed { scheduled_for: expected });

        let commands = drain(&mut rx);
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| matches!(c, SchedulerCommand::ArmRetry(_))));
    }

    #[test]
    fn midnight_aborts_and_disarms() {
        let (mut retry, mut rx) = coordinator(true);
        retry.on_failure(&local(23, 0));
        let state = retry.on_failure(&local(23, 50));

        assert_eq!(state, RetryState::Idle);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SchedulerCommand::ArmRetry(_), SchedulerCommand::CancelRetry]
        ));
    }

    #[test]
    fn success_always_cancels() {
        let (mut retry, mut rx) = coordinator(true);
        retry.on_failure(&local(10, 0));
        retry.on_success();
        assert_eq!(retry.state(), RetryState::Idle);

        // Even when idle the cancel is still sent.
        retry.on_success();
        let commands = drain(&mut rx);
        assert!(matches!(
            commands.as_slice(),
            [
                SchedulerCommand::ArmRetry(_),
                SchedulerCommand::CancelRetry,
                SchedulerCommand::CancelRetry
            ]
        ));
    }

    #[test]
    fn disabled_policy_never_arms() {
        let (mut retry, mut rx) = coordinator(false);
        assert_eq!(retry.on_failure(&local(10, 0)), RetryState::Idle);
        assert!(drain(&mut rx).is_empty());
    }
}
