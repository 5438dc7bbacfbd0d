use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{OutgoingMessage, Publisher};

/// Slack incoming-webhook destination.
pub struct SlackPublisher {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackPublisher {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

fn payload(msg: &OutgoingMessage) -> serde_json::Value {
    let mut blocks = vec![serde_json::json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": msg.text },
    })];
    if let Some(url) = &msg.image_url {
        blocks.push(serde_json::json!({
            "type": "image",
            "image_url": url,
            "alt_text": "article image",
        }));
    }
    serde_json::json!({ "text": msg.text, "blocks": blocks })
}

#[async_trait::async_trait]
impl Publisher for SlackPublisher {
    async fn publish(&self, msg: &OutgoingMessage) -> Result<()> {
        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&payload(msg))
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}
