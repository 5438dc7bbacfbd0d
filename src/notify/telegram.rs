use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::message::strip_markdown;
use super::{OutgoingMessage, Publisher};

const TELEGRAM_API: &str = "https://api.telegram.org";
const CAPTION_LIMIT: usize = 1024;
const MESSAGE_LIMIT: usize = 4096;

#[derive(Clone)]
pub struct TelegramPublisher {
    bot_token: String,
    chat_id: String,
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    description: Option<String>,
}

impl TelegramPublisher {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: Client::new(),
            base_url: TELEGRAM_API.to_string(),
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

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<()> {
        let url = format!("{}/bot{}/{}", self.base_url, self.bot_token, method);
        let rsp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            // the URL embeds the token; keep it out of error chains
            .map_err(|e| anyhow!("telegram {method} request failed: {}", e.without_url()))?;
        let status = rsp.status();
        let reply: Option<ApiReply> = rsp.json().await.ok();
        match reply {
            Some(r) if r.ok && status.is_success() => Ok(()),
            Some(r) => Err(anyhow!(
                "telegram {method} rejected ({status}): {}",
                r.description.unwrap_or_default()
            )),
            None => Err(anyhow!("telegram {method} HTTP {status}")),
        }
    }

    async fn send_photo(&self, photo: &str, caption: Option<&str>) -> Result<()> {
        let body = SendPhoto {
            chat_id: &self.chat_id,
            photo,
            caption,
            parse_mode: caption.map(|_| "Markdown"),
        };
        self.call("sendPhoto", &body).await
    }

    /// Markdown first; if Telegram refuses it, the same text without markup.
    async fn send_text(&self, text: &str) -> Result<()> {
        let text: String = text.chars().take(MESSAGE_LIMIT).collect();
        let md = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: Some("Markdown"),
            disable_web_page_preview: true,
        };
        match self.call("sendMessage", &md).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(target: "notify", error = ?e, "markdown send failed, retrying as plain text");
                let plain = strip_markdown(&text);
                let body = SendMessage {
                    chat_id: &self.chat_id,
                    text: &plain,
                    parse_mode: None,
                    disable_web_page_preview: true,
                };
                self.call("sendMessage", &body)
                    .await
                    .context("telegram plain-text send")
            }
        }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, msg: &OutgoingMessage) -> Result<()> {
        if let Some(photo) = msg.image_url.as_deref() {
            if msg.text.chars().count() <= CAPTION_LIMIT {
                match self.send_photo(photo, Some(&msg.text)).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(target: "notify", error = ?e, "photo with caption failed, sending text only")
                    }
                }
            } else {
                match self.send_photo(photo, None).await {
                    Ok(()) => {
                        // Photo is already in the channel; never resend it.
                        if let Err(e) = self.send_text(&msg.text).await {
                            tracing::warn!(target: "notify", error = ?e, "text after photo failed, counting as delivered");
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(target: "notify", error = ?e, "standalone photo failed, sending text only")
                    }
                }
            }
        }
        self.send_text(&msg.text).await
    }

    fn name(&self) -> &str {
        "telegram"
    }

    /// Photo, Markdown text, plain-text fallback.
    fn max_requests(&self) -> u32 {
        3
    }
}
