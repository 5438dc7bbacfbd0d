pub mod image;
pub mod message;
pub mod slack;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

pub use image::{HtmlImageResolver, ImageResolver, NoImages};
pub use message::{format_message, strip_markdown, DEFAULT_TEMPLATE};
pub use slack::SlackPublisher;
pub use telegram::TelegramPublisher;

/// A rendered post, ready for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub image_url: Option<String>,
}

/// Delivery destination for qualified articles.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, msg: &OutgoingMessage) -> Result<()>;
    fn name(&self) -> &str;

    /// Most sequential requests one `publish` may make, each under its own
    /// timeout. Callers size their overall deadline from this.
    fn max_requests(&self) -> u32 {
        1
    }
}

/// Dry-run destination; logs instead of sending.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, msg: &OutgoingMessage) -> Result<()> {
        tracing::info!(
            target: "notify",
            image = msg.image_url.as_deref().unwrap_or("-"),
            "dry-run post:\n{}",
            msg.text
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
