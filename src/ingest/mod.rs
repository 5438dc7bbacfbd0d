// src/ingest/mod.rs
pub mod identity;
pub mod providers;
pub mod types;

use crate::ingest::types::{ArticleCandidate, FeedProvider};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_entries_total", "Total entries parsed from feeds.");
        describe_counter!(
            "ingest_candidates_total",
            "Candidates produced by a fetch round."
        );
        describe_counter!("ingest_feed_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// What one fetch round produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Candidates in feed order, feeds in configured order.
    pub candidates: Vec<ArticleCandidate>,
    pub failed_feeds: Vec<String>,
}

/// Fetch every provider once. A failing or hanging feed is logged and skipped;
/// the rest still contribute.
pub async fn run_once(providers: &[Box<dyn FeedProvider>], per_feed_timeout: Duration) -> FetchOutcome {
    ensure_metrics_described();

    let mut out = FetchOutcome::default();
    for p in providers {
        let res = tokio::time::timeout(per_feed_timeout, p.fetch_latest()).await;
        match res {
            Ok(Ok(mut v)) => {
                tracing::info!(target: "ingest", feed = p.name(), entries = v.len(), "feed fetched");
                out.candidates.append(&mut v);
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "ingest", error = ?e, feed = p.name(), "feed error, skipping");
                counter!("ingest_feed_errors_total").increment(1);
                out.failed_feeds.push(p.name().to_string());
            }
            Err(_) => {
                tracing::warn!(
                    target: "ingest",
                    feed = p.name(),
                    timeout_secs = per_feed_timeout.as_secs(),
                    "feed timed out, skipping"
                );
                counter!("ingest_feed_errors_total").increment(1);
                out.failed_feeds.push(p.name().to_string());
            }
        }
    }

    counter!("ingest_candidates_total").increment(out.candidates.len() as u64);
    out
}
