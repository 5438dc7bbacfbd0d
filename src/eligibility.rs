//! # Eligibility Filter
//! Decides which candidates may be analyzed this tick, and in what order.
//!
//! Order of rules: quiet-hours gate (whole tick), in-batch duplicates,
//! freshness, posted-once dedup, then new articles before re-analysis
//! candidates, each tier keeping feed arrival order.

use chrono::{DateTime, Local, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::history::HistoryStore;
use crate::ingest::types::ArticleCandidate;

/// Local-time window with no analysis or posting.
/// Start hour inclusive, end hour exclusive; may wrap past midnight.
/// `start == end` disables the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 7,
        }
    }
}

impl QuietHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour: start_hour % 24,
            end_hour: end_hour % 24,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn contains(&self, hour: u32) -> bool {
        let (s, e, h) = (self.start_hour, self.end_hour, hour % 24);
        if s == e {
            false
        } else if s < e {
            h >= s && h < e
        } else {
            h >= s || h < e
        }
    }
}

/// Wall-clock hour of `now` in `tz`, or in the machine's zone when `None`.
pub fn local_hour(now: DateTime<Utc>, tz: Option<Tz>) -> u32 {
    match tz {
        Some(tz) => now.with_timezone(&tz).hour(),
        None => now.with_timezone(&Local).hour(),
    }
}

#[derive(Debug, Default)]
pub struct Selection {
    /// Quiet hours were active; nothing else was evaluated.
    pub quiet: bool,
    pub candidates: Vec<ArticleCandidate>,
    /// How many of `candidates` (at the front) have never been analyzed.
    pub new_count: usize,
    pub already_posted: usize,
    pub duplicates: usize,
    pub stale: usize,
}

pub fn select_eligible(
    candidates: Vec<ArticleCandidate>,
    history: &HistoryStore,
    quiet_hours: QuietHours,
    local_hour: u32,
    freshness_cutoff: Option<DateTime<Utc>>,
) -> Selection {
    if quiet_hours.contains(local_hour) {
        return Selection {
            quiet: true,
            ..Default::default()
        };
    }

    let mut sel = Selection::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    let mut fresh_tier = Vec::new();
    let mut retry_tier = Vec::new();

    for c in candidates {
        if !seen.insert(c.identity.clone()) {
            sel.duplicates += 1;
            continue;
        }
        if let (Some(cutoff), Some(published)) = (freshness_cutoff, c.publish_time) {
            if published < cutoff {
                sel.stale += 1;
                continue;
            }
        }
        match history.lookup(&c.identity) {
            None => fresh_tier.push(c),
            Some(e) if e.is_posted() => sel.already_posted += 1,
            Some(_) => retry_tier.push(c),
        }
    }

    sel.new_count = fresh_tier.len();
    sel.candidates = fresh_tier;
    sel.candidates.append(&mut retry_tier);
    sel
}
