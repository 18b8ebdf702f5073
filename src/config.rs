//! Daemon configuration.
//!
//! Layered with figment: built-in defaults, then the TOML file, then
//! `CONSOLE_BACKUP_*` environment variables (`__` for nesting), then any CLI
//! overrides. The daemon only reads configuration; it never writes it back.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::locator::DEFAULT_REMOTE_DIR;
use crate::core::remote::{ConnectionParams, Credential};
use crate::core::retry::RetryPolicy;
use crate::core::runner::RunnerOptions;
use crate::core::schedule::ScheduleSpec;

pub const ENV_PREFIX: &str = "CONSOLE_BACKUP_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid backup time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("invalid http bind address {0:?}")]
    InvalidBind(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub to: String,
    pub tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            user: String::new(),
            password: String::new(),
            to: String::new(),
            tls: false,
        }
    }
}

impl SmtpConfig {
    /// Mail is only attempted with both a relay and a recipient.
    pub fn is_usable(&self) -> bool {
        !self.host.is_empty() && !self.to.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_dir: String,
    pub backup_root: PathBuf,
    pub history_file: PathBuf,
    pub known_hosts_file: PathBuf,
    pub host_key_fingerprint: Option<String>,
    pub connect_timeout_secs: u64,
    pub backup_time: String,
    pub timezone: String,
    pub retry_on_fail: bool,
    pub retry_delay_minutes: u32,
    pub send_report: bool,
    pub client_name: String,
    pub http_bind: String,
    pub smtp: Option<SmtpConfig>,
    pub slack_webhook: Option<String>,
    pub simulation: bool,
    pub verbose: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: "root".to_string(),
            password: String::new(),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            backup_root: PathBuf::from("backups"),
            history_file: PathBuf::from("history.json"),
            known_hosts_file: PathBuf::from("known_hosts.json"),
            host_key_fingerprint: None,
            connect_timeout_secs: 10,
            backup_time: "22:30".to_string(),
            timezone: "UTC".to_string(),
            retry_on_fail: false,
            retry_delay_minutes: 30,
            send_report: false,
            client_name: "Client".to_string(),
            http_bind: "127.0.0.1:5000".to_string(),
            smtp: None,
            slack_webhook: None,
            simulation: false,
            verbose: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional file) plus environment, then apply `overrides`.
    pub fn load<T: Serialize>(path: &Path, overrides: Option<&T>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule_spec()?;
        self.http_addr()?;
        Ok(())
    }

    pub fn schedule_spec(&self) -> Result<ScheduleSpec, ConfigError> {
        ScheduleSpec::parse(&self.backup_time, &self.timezone)
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http_bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.http_bind.clone()))
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            credential: Credential::new(self.password.clone()),
        }
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            retry: RetryPolicy::new(self.retry_on_fail, self.retry_delay_minutes),
            send_report: self.send_report,
            client_name: self.client_name.clone(),
        }
    }
}
