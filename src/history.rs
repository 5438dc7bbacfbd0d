//! Persisted record of every article identity ever analyzed.
//!
//! The whole document is read at startup and rewritten (tmp file + rename)
//! on every mutation, before the mutating call returns. Nothing is flushed in
//! the background.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DOC_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub first_seen_time: DateTime<Utc>,
    #[serde(default)]
    pub times_analyzed: u32,
    /// Styles already applied. Informational only: eligibility never reads
    /// it, so an unposted article stays eligible after every style was tried.
    #[serde(default)]
    pub prompt_variants_used: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_posted_time: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    fn new(first_seen_time: DateTime<Utc>) -> Self {
        Self {
            first_seen_time,
            times_analyzed: 0,
            prompt_variants_used: BTreeSet::new(),
            last_posted_time: None,
        }
    }

    /// Only a recorded post counts; an entry alone means "analyzed".
    pub fn is_posted(&self) -> bool {
        self.last_posted_time.is_some()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryDoc {
    version: u32,
    entries: BTreeMap<String, HistoryEntry>,
}

/// How the backing file looked at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Loaded(usize),
    /// File was unreadable or corrupt; the store started empty.
    Recovered(String),
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: BTreeMap<String, HistoryEntry>,
}

impl HistoryStore {
    /// Never fails: a broken file yields an empty store and `LoadOutcome::Recovered`.
    pub fn open(path: impl Into<PathBuf>) -> (Self, LoadOutcome) {
        let path = path.into();
        let (entries, outcome) = match fs::read_to_string(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => (BTreeMap::new(), LoadOutcome::Missing),
            Err(e) => {
                let reason = format!("history file unreadable: {e}");
                (BTreeMap::new(), LoadOutcome::Recovered(reason))
            }
            Ok(s) if s.trim().is_empty() => (BTreeMap::new(), LoadOutcome::Loaded(0)),
            Ok(s) => match serde_json::from_str::<HistoryDoc>(&s) {
                Ok(doc) => {
                    if doc.version > DOC_VERSION {
                        warn!(target: "history", version = doc.version, "history written by a newer build");
                    }
                    let n = doc.entries.len();
                    (doc.entries, LoadOutcome::Loaded(n))
                }
                Err(e) => {
                    quarantine(&path);
                    let reason = format!("history file corrupt: {e}");
                    (BTreeMap::new(), LoadOutcome::Recovered(reason))
                }
            },
        };

        match &outcome {
            LoadOutcome::Recovered(reason) => {
                warn!(target: "history", path = %path.display(), %reason, "starting with empty history");
            }
            LoadOutcome::Loaded(n) => {
                info!(target: "history", path = %path.display(), entries = n, "history loaded");
            }
            LoadOutcome::Missing => {
                info!(target: "history", path = %path.display(), "no history file yet");
            }
        }

        (Self { path, entries }, outcome)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, identity: &str) -> Option<&HistoryEntry> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create-if-absent, bump `times_analyzed`, remember the style. Durable on return.
    pub fn record_analysis(
        &mut self,
        identity: &str,
        style_used: &str,
        first_seen_time: DateTime<Utc>,
    ) -> Result<()> {
        let previous = self.entries.get(identity).cloned();
        let entry = self
            .entries
            .entry(identity.to_string())
            .or_insert_with(|| HistoryEntry::new(first_seen_time));
        entry.times_analyzed = entry.times_analyzed.saturating_add(1);
        entry.prompt_variants_used.insert(style_used.to_string());

        self.commit_or_restore(identity, previous)
            .context("recording analysis")
    }

    /// Mark the article as posted. Durable on return.
    pub fn record_post(&mut self, identity: &str, time: DateTime<Utc>) -> Result<()> {
        let previous = self.entries.get(identity).cloned();
        let entry = self
            .entries
            .entry(identity.to_string())
            .or_insert_with(|| HistoryEntry::new(time));
        entry.last_posted_time = Some(time);

        self.commit_or_restore(identity, previous)
            .context("recording post")
    }

    /// Drop entries first seen before `now - older_than`. Returns how many went.
    pub fn prune(&mut self, older_than: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - older_than;
        let before = self.entries.clone();
        self.entries.retain(|_, e| e.first_seen_time >= cutoff);
        let removed = before.len() - self.entries.len();
        if removed == 0 {
            return Ok(0);
        }
        if let Err(e) = self.persist() {
            self.entries = before;
            return Err(e).context("pruning history");
        }
        Ok(removed)
    }

    fn commit_or_restore(&mut self, identity: &str, previous: Option<HistoryEntry>) -> Result<()> {
        if let Err(e) = self.persist() {
            match previous {
                Some(p) => {
                    self.entries.insert(identity.to_string(), p);
                }
                None => {
                    self.entries.remove(identity);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating history dir {}", dir.display()))?;
        }
        let doc = HistoryDocRef {
            version: DOC_VERSION,
            entries: &self.entries,
        };
        let json = serde_json::to_vec_pretty(&doc).context("serializing history")?;

        let tmp = sibling(&self.path, ".tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)
            .with_context(|| format!("writing {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("syncing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct HistoryDocRef<'a> {
    version: u32,
    entries: &'a BTreeMap<String, HistoryEntry>,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Keep a corrupt file aside instead of overwriting it on the next write.
fn quarantine(path: &Path) {
    let target = sibling(path, ".corrupt");
    if let Err(e) = fs::rename(path, &target) {
        warn!(target: "history", error = %e, "could not move corrupt history aside");
    }
}
