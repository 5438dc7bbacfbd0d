// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::ingest::identity::article_identity;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ArticleCandidate {
    pub source_name: String, // feed display name
    pub identity: String,    // derived, see ingest::identity
    pub title: String,
    pub summary_text: String, // normalized text
    pub link: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
}

impl ArticleCandidate {
    /// Builds a candidate and derives its identity from the link (or title).
    pub fn new(
        source_name: impl Into<String>,
        title: impl Into<String>,
        summary_text: impl Into<String>,
        link: Option<String>,
    ) -> Self {
        let source_name = source_name.into();
        let title = title.into();
        let link = link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        let identity = article_identity(&source_name, &title, link.as_deref());
        Self {
            source_name,
            identity,
            title,
            summary_text: summary_text.into(),
            link,
            publish_time: None,
            image_url: None,
        }
    }

    pub fn with_publish_time(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.publish_time = ts;
        self
    }

    pub fn with_image(mut self, url: Option<String>) -> Self {
        self.image_url = url.filter(|u| !u.trim().is_empty());
        self
    }
}

#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<ArticleCandidate>>;
    fn name(&self) -> &str;
}
