use super::{NotificationChannel, NotifyError};
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(subject: &str, body: &str) -> serde_json::Value {
        json!({
            "text": subject,
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": subject,
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": body
                    }
                }
            ]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let payload = Self::format_message(subject, body);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_subject_and_body() {
        let payload = SlackNotifier::format_message("Subject", "Body text");
        assert_eq!(payload["text"], "Subject");
        assert_eq!(payload["blocks"][0]["text"]["text"], "Subject");
        assert_eq!(payload["blocks"][1]["text"]["text"], "Body text");
    }
}
