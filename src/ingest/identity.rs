// src/ingest/identity.rs
//! Stable article identities.
//!
//! The key is a SHA-256 prefix of the normalized article URL, so the same
//! story fetched twice (or linked with different tracking parameters from two
//! feeds) maps to one history entry. Entries without a usable link fall back
//! to source + normalized title.

use sha2::{Digest, Sha256};
use url::Url;

/// scheme://host[:port]/path with query, fragment and trailing `/` removed.
/// `None` for anything that is not an absolute http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(parsed.path().trim_end_matches('/'));
    Some(out)
}

pub fn article_identity(source_name: &str, title: &str, link: Option<&str>) -> String {
    match link.and_then(normalize_url) {
        Some(url) => digest(&format!("url|{url}")),
        None => digest(&format!(
            "title|{}|{}",
            source_name.trim().to_lowercase(),
            normalize_title(title)
        )),
    }
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
