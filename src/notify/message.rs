//! Post rendering from a per-style template.

use chrono::{DateTime, Utc};

use crate::analyze::ai_adapter::Verdict;
use crate::ingest::types::ArticleCandidate;
use crate::rotator::PromptVariant;

pub const DEFAULT_TEMPLATE: &str = "{emoji} *VC/Startup Opportunity Detected*\n\n\
*Source:* {source}\n*Title:* {title}\n\n\
*Type:* {opportunity_type}\n*Risk Level:* {risk_level}\n\n\
*Analysis:*\n{explanation}\n\n\
*Link:* {link}\n\n\
_Analyzed at {timestamp}_\n_Style: {style}_";

/// Fill the variant's template (or the default one) for this article.
/// Unknown placeholders are left as-is.
pub fn format_message(
    article: &ArticleCandidate,
    verdict: &Verdict,
    variant: &PromptVariant,
    analyzed_at: DateTime<Utc>,
) -> String {
    let template = variant
        .template
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TEMPLATE);

    let timestamp = analyzed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let fields: [(&str, &str); 9] = [
        ("{emoji}", &variant.emoji),
        ("{source}", &article.source_name),
        ("{title}", &article.title),
        (
            "{opportunity_type}",
            verdict.opportunity_type.as_deref().unwrap_or("N/A"),
        ),
        ("{risk_level}", verdict.risk_level.as_deref().unwrap_or("N/A")),
        (
            "{explanation}",
            verdict
                .explanation
                .as_deref()
                .unwrap_or("No analysis available"),
        ),
        ("{link}", article.link.as_deref().unwrap_or("N/A")),
        ("{timestamp}", &timestamp),
        ("{style}", &variant.name),
    ];

    // Single pass so values containing `{...}` are never re-expanded.
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    'scan: while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for &(key, value) in &fields {
            if tail.starts_with(key) {
                out.push_str(value);
                rest = &tail[key.len()..];
                continue 'scan;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Plain-text rendition for destinations that rejected the markup.
pub fn strip_markdown(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '*' | '_' | '`')).collect()
}
