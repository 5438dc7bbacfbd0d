// src/ingest/providers/rss.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::config::FeedConfig;
use crate::ingest::normalize_text;
use crate::ingest::types::{ArticleCandidate, FeedProvider};

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; VCNewsBot/1.0)";

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content", default)]
    media_content: Vec<MediaRef>,
    #[serde(rename = "thumbnail", default)]
    media_thumbnail: Vec<MediaRef>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}

// --- Atom (feedburner and friends) ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(default)]
    link: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

/// First `<img src>` inside an HTML fragment.
fn first_img_src(html: &str) -> Option<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("img regex")
    });
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_image(medium: Option<&str>, kind: Option<&str>) -> bool {
    medium.map(|m| m.eq_ignore_ascii_case("image")).unwrap_or(false)
        || kind.map(|k| k.starts_with("image/")).unwrap_or(false)
        || (medium.is_none() && kind.is_none())
}

/// Relative image paths are resolved against the entry link.
fn absolutize(img: String, link: Option<&str>) -> Option<String> {
    match url::Url::parse(&img) {
        Ok(_) => Some(img),
        Err(_) => link
            .and_then(|l| url::Url::parse(l).ok())
            .and_then(|base| base.join(&img).ok())
            .map(|u| u.to_string()),
    }
}

fn item_image(it: &Item) -> Option<String> {
    it.media_content
        .iter()
        .chain(it.media_thumbnail.iter())
        .filter(|m| is_image(m.medium.as_deref(), m.kind.as_deref()))
        .find_map(|m| m.url.clone())
        .or_else(|| {
            it.enclosure
                .iter()
                .filter(|e| e.kind.as_deref().is_some_and(|k| k.starts_with("image/")))
                .find_map(|e| e.url.clone())
        })
        .or_else(|| it.description.as_deref().and_then(first_img_src))
}

pub struct RssFeedProvider {
    name: String,
    max_items: usize,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedProvider {
    pub fn from_config(cfg: &FeedConfig, client: reqwest::Client, max_items: usize) -> Self {
        Self {
            name: cfg.name.clone(),
            max_items,
            mode: Mode::Http {
                url: cfg.url.clone(),
                client,
            },
        }
    }

    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            max_items: 10,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n.max(1);
        self
    }

    pub fn parse_items_from_str(&self, s: &str) -> Result<Vec<ArticleCandidate>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);

        let out = if looks_like_atom(&xml_clean) {
            let feed: AtomFeed = from_str(&xml_clean)
                .with_context(|| format!("parsing atom xml for {}", self.name))?;
            self.collect_atom(feed)
        } else {
            let rss: Rss = from_str(&xml_clean)
                .with_context(|| format!("parsing rss xml for {}", self.name))?;
            self.collect_rss(rss)
        };

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("ingest_entries_total").increment(out.len() as u64);
        Ok(out)
    }

    fn collect_rss(&self, rss: Rss) -> Vec<ArticleCandidate> {
        let mut out = Vec::with_capacity(rss.channel.item.len().min(self.max_items));
        for it in rss.channel.item.iter().take(self.max_items) {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let summary = normalize_text(it.description.as_deref().unwrap_or_default());
            out.push(
                ArticleCandidate::new(self.name.clone(), title, summary, it.link.clone())
                    .with_publish_time(it.pub_date.as_deref().and_then(parse_feed_date))
                    .with_image(item_image(it).and_then(|i| absolutize(i, it.link.as_deref()))),
            );
        }
        out
    }

    fn collect_atom(&self, feed: AtomFeed) -> Vec<ArticleCandidate> {
        let mut out = Vec::with_capacity(feed.entry.len().min(self.max_items));
        for e in feed.entry.into_iter().take(self.max_items) {
            let title = normalize_text(&e.title.unwrap_or_default().value);
            if title.is_empty() {
                continue;
            }
            let body = e.summary.or(e.content).unwrap_or_default().value;
            let link = e
                .link
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| e.link.first())
                .and_then(|l| l.href.clone());
            let image = first_img_src(&body).and_then(|i| absolutize(i, link.as_deref()));
            let published = e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_feed_date);
            out.push(
                ArticleCandidate::new(self.name.clone(), title, normalize_text(&body), link)
                    .with_publish_time(published)
                    .with_image(image),
            );
        }
        out
    }
}

#[async_trait]
impl FeedProvider for RssFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<ArticleCandidate>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .header(reqwest::header::USER_AGENT, USER_AGENT)
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?;
                let status = resp.status();
                if !status.is_success() {
                    bail!("{} returned HTTP {status}", self.name);
                }
                let body = resp
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn looks_like_atom(s: &str) -> bool {
    let head: String = s.chars().take(2048).collect();
    head.contains("<feed") && !head.contains("<rss")
}

/// quick-xml only knows the five XML entities; feeds love HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
