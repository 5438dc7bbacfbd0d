//! Article image lookup for posts whose feed entry carried none.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

use crate::ingest::providers::rss::USER_AGENT;

#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Best-effort; `None` means "post without an image".
    async fn resolve(&self, article_url: &str) -> Option<String>;
}

/// Never finds anything.
pub struct NoImages;

#[async_trait]
impl ImageResolver for NoImages {
    async fn resolve(&self, _article_url: &str) -> Option<String> {
        None
    }
}

/// Fetches the article page and reads og:image, twitter:image, or the first
/// image inside `<article>`.
pub struct HtmlImageResolver {
    client: Client,
    timeout: Duration,
}

impl HtmlImageResolver {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, article_url: &str) -> anyhow::Result<String> {
        let body = self
            .client
            .get(article_url)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

#[async_trait]
impl ImageResolver for HtmlImageResolver {
    async fn resolve(&self, article_url: &str) -> Option<String> {
        match self.fetch(article_url).await {
            Ok(body) => find_page_image(&body, article_url),
            Err(e) => {
                tracing::debug!(target: "notify", error = ?e, url = article_url, "image page fetch failed");
                None
            }
        }
    }
}

/// Pure HTML part of the lookup.
pub fn find_page_image(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let meta = |css: &str| -> Option<String> {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel)
            .filter_map(|m| m.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string)
    };

    let found = meta(r#"meta[property="og:image"]"#)
        .or_else(|| meta(r#"meta[name="twitter:image"]"#))
        .or_else(|| {
            let sel = Selector::parse("article img[src]").ok()?;
            doc.select(&sel)
                .filter_map(|img| img.value().attr("src"))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        })?;

    resolve_relative(&found, page_url)
}

/// Absolute http(s) URL for `src` as seen from `page_url`.
pub fn resolve_relative(src: &str, page_url: &str) -> Option<String> {
    let joined = match Url::parse(src) {
        Ok(abs) => abs,
        Err(_) => Url::parse(page_url).ok()?.join(src).ok()?,
    };
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}
