mod slack;
mod smtp;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;

pub use slack::SlackNotifier;
pub use smtp::SmtpNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("no notification channel is configured")]
    NotConfigured,
}

/// Reports that go out after an execution.
#[derive(Debug, Clone)]
pub enum Report {
    Succeeded { client: String, filename: String },
    Failed { client: String, error: String },
    Test { client: String },
}

impl Report {
    pub fn subject(&self) -> String {
        match self {
            Self::Succeeded { client, .. } => format!("{} UniFi Network Backup : Success", client),
            Self::Failed { client, .. } => {
                format!("WARNING : {} UniFi Network Backup : FAILED", client)
            }
            Self::Test { client } => format!("{} UniFi Backup Test", client),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Self::Succeeded { filename, .. } => {
                format!("Backup {} retrieved successfully.", filename)
            }
            Self::Failed { error, .. } => format!("Backup failed: {}", error),
            Self::Test { .. } => "Test email".to_string(),
        }
    }
}

/// A place reports can be delivered (mail, chat webhook, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError>;

    async fn send_report(&self, report: &Report) -> Result<(), NotifyError> {
        self.send(&report.subject(), &report.body()).await
    }
}

/// Build the configured channel. Mail wins when both mail and Slack are set.
pub fn create_notifier(config: &AppConfig) -> Option<Arc<dyn NotificationChannel>> {
    if let Some(smtp) = config.smtp.as_ref().filter(|s| s.is_usable()) {
        return Some(Arc::new(SmtpNotifier::new(smtp.clone())));
    }

    let webhook = config.slack_webhook.as_ref()?;
    if webhook.is_empty() {
        return None;
    }
    Some(Arc::new(SlackNotifier::new(webhook.clone())))
}
