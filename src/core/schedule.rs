//! Daily trigger configuration and the registry of installed triggers.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use super::clock::resolve_timezone;
use crate::config::ConfigError;

static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{2})\s*$").expect("time-of-day pattern is valid")
});

/// When the daily trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
}

impl ScheduleSpec {
    pub fn new(hour: u32, minute: u32, timezone: Tz) -> Result<Self, ConfigError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidTime(format!("{:02}:{:02}", hour, minute)));
        }
        Ok(Self {
            hour,
            minute,
            timezone,
        })
    }

    /// Parse `HH:MM` plus an IANA timezone name.
    pub fn parse(time: &str, timezone: &str) -> Result<Self, ConfigError> {
        let caps = TIME_OF_DAY
            .captures(time)
            .ok_or_else(|| ConfigError::InvalidTime(time.to_string()))?;
        let hour = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidTime(time.to_string()))?;
        let minute = caps[2]
            .parse()
            .map_err(|_| ConfigError::InvalidTime(time.to_string()))?;
        Self::new(hour, minute, resolve_timezone(timezone)?)
    }

    /// First firing strictly after `after`.
    ///
    /// A local time that happens twice (clocks going back) fires once, at the
    /// earlier instant. A local time skipped by a forward jump fires one hour
    /// later in wall-clock terms, i.e. right after the gap.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let start = after.with_timezone(&self.timezone).date_naive();
        let mut day = start;
        loop {
            if let Some(candidate) = self.fire_on(day) {
                if candidate > after {
                    return candidate;
                }
            }
            day = day.succ_opt().unwrap_or(day + Duration::days(1));
        }
    }

    fn fire_on(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = day.and_hms_opt(self.hour, self.minute, 0)?;
        resolve_local(self.timezone, naive).map(|t| t.with_timezone(&Utc))
    }

    pub fn time_string(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time_string(), self.timezone.name())
    }
}

fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    }
}

/// Logical role of an installed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRole {
    Daily,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Daily(ScheduleSpec),
    Once(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    trigger: Trigger,
    next_fire: DateTime<Utc>,
}

/// Installed triggers keyed by role. At most one entry per role.
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: BTreeMap<JobRole, Entry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the daily trigger, replacing whatever was there.
    pub fn install_daily(&mut self, spec: ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
        let next_fire = spec.next_after(now);
        self.entries.insert(
            JobRole::Daily,
            Entry {
                trigger: Trigger::Daily(spec),
                next_fire,
            },
        );
        next_fire
    }

    /// Install the one-shot retry, replacing any pending one.
    /// Returns the instant it replaced, if any.
    pub fn install_retry(&mut self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .insert(
                JobRole::Retry,
                Entry {
                    trigger: Trigger::Once(at),
                    next_fire: at,
                },
            )
            .map(|old| old.next_fire)
    }

    pub fn remove(&mut self, role: JobRole) -> bool {
        self.entries.remove(&role).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn next_fire(&self, role: JobRole) -> Option<DateTime<Utc>> {
        self.entries.get(&role).map(|e| e.next_fire)
    }

    pub fn trigger(&self, role: JobRole) -> Option<Trigger> {
        self.entries.get(&role).map(|e| e.trigger)
    }

    /// Earliest pending firing across all roles.
    pub fn next_due(&self) -> Option<(JobRole, DateTime<Utc>)> {
        self.entries
            .iter()
            .map(|(role, e)| (*role, e.next_fire))
            .min_by_key(|(_, at)| *at)
    }

    /// Collect every role due at `now`. One-shots are removed, recurring
    /// triggers are advanced past `now` so they cannot fire twice.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<JobRole> {
        let due: Vec<JobRole> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_fire <= now)
            .map(|(role, _)| *role)
            .collect();

        for role in &due {
            let Some(entry) = self.entries.get_mut(role) else {
                continue;
            };
            match entry.trigger {
                Trigger::Daily(spec) => entry.next_fire = spec.next_after(now),
                Trigger::Once(_) => {
                    self.entries.remove(role);
                }
            }
        }

        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
