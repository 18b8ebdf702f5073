//! Wall-clock access and timezone resolution.
//!
//! Everything that needs "today" goes through a [`Clock`] so tests can pin
//! the current instant instead of racing midnight.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

use crate::config::ConfigError;

/// Format of the per-day key used for history records and local directories.
pub const DATE_KEY_FORMAT: &str = "%Y%m%d";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resolve an IANA timezone name such as `Europe/Paris`.
pub fn resolve_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

pub fn local_now(clock: &dyn Clock, tz: Tz) -> DateTime<Tz> {
    clock.now().with_timezone(&tz)
}

/// `YYYYMMDD` for the given local instant.
pub fn date_key(local: &DateTime<Tz>) -> String {
    local.format(DATE_KEY_FORMAT).to_string()
}
