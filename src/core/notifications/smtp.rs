use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{NotificationChannel, NotifyError};
use crate::config::SmtpConfig;

/// Plain-text mail over SMTP, optionally upgraded with STARTTLS.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// The sender is the login user when there is one, else the recipient.
    fn sender(&self) -> &str {
        if self.config.user.is_empty() {
            &self.config.to
        } else {
            &self.config.user
        }
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message, NotifyError> {
        Ok(Message::builder()
            .from(self.sender().parse()?)
            .to(self.config.to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let builder = if self.config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };

        let builder = builder.port(self.config.port);
        let builder = if self.config.user.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ))
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationChannel for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = self.build_message(subject, body)?;
        let transport = self.transport()?;
        transport.send(message).await?;
        debug!(to = %self.config.to, subject, "Mail sent");
        Ok(())
    }
}
