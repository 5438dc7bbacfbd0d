#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use vc_news_analyzer::ai_adapter::{Analyzer, Verdict};
use vc_news_analyzer::notify::{ImageResolver, OutgoingMessage, Publisher};
use vc_news_analyzer::{
    ArticleCandidate, CycleOrchestrator, CycleSettings, FeedProvider, HistoryStore, PostingQuota,
    PromptRotator, PromptVariant, QuietHours,
};

/// 2025-03-10 12:00 UTC, outside the default quiet window.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

pub fn at_hour(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, h, 0, 0).unwrap()
}

pub fn article(source: &str, key: &str) -> ArticleCandidate {
    ArticleCandidate::new(
        source,
        format!("Story {key}"),
        format!("Summary of {key}"),
        Some(format!("https://news.example.com/{key}")),
    )
}

// ---------- feeds ----------

pub enum FeedBehavior {
    Items(Vec<ArticleCandidate>),
    Fail,
    Hang,
}

pub struct StubFeed {
    pub name: String,
    pub behavior: FeedBehavior,
    pub calls: AtomicUsize,
}

impl StubFeed {
    pub fn items(name: &str, items: Vec<ArticleCandidate>) -> Self {
        Self {
            name: name.into(),
            behavior: FeedBehavior::Items(items),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.into(),
            behavior: FeedBehavior::Fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging(name: &str) -> Self {
        Self {
            name: name.into(),
            behavior: FeedBehavior::Hang,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FeedProvider for StubFeed {
    async fn fetch_latest(&self) -> Result<Vec<ArticleCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            FeedBehavior::Items(v) => Ok(v.clone()),
            FeedBehavior::Fail => Err(anyhow!("{} unreachable", self.name)),
            FeedBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------- analyzer ----------

type Rule = dyn Fn(&ArticleCandidate) -> Result<Verdict> + Send + Sync;

/// Records every call; the verdict comes from a rule closure.
pub struct ScriptedAnalyzer {
    rule: Box<Rule>,
    pub calls: Mutex<Vec<(String, String)>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedAnalyzer {
    pub fn new(rule: impl Fn(&ArticleCandidate) -> Result<Verdict> + Send + Sync + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every article qualifies.
    pub fn always_yes() -> Self {
        Self::new(|_| Ok(opportunity()))
    }

    /// Nothing qualifies.
    pub fn always_no() -> Self {
        Self::new(|_| {
            Ok(Verdict {
                is_opportunity: false,
                explanation: Some("noise".into()),
                ..Default::default()
            })
        })
    }

    /// Calls block until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }

    pub fn styles(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.1.clone()).collect()
    }
}

pub fn opportunity() -> Verdict {
    Verdict {
        is_opportunity: true,
        opportunity_type: Some("funding round".into()),
        risk_level: Some("MEDIUM".into()),
        explanation: Some("Fresh capital in a hot category.".into()),
        confidence: Some(0.9),
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze<'a>(
        &'a self,
        article: &'a ArticleCandidate,
        variant: &'a PromptVariant,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((article.title.clone(), variant.name.clone()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            (self.rule)(article)
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// ---------- publisher ----------

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub attempts: AtomicUsize,
    /// Number of upcoming publish calls that fail.
    pub fail_next: AtomicUsize,
}

impl RecordingPublisher {
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_next: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, msg: &OutgoingMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("chat API unavailable"));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub struct FixedImage(pub &'static str);

#[async_trait]
impl ImageResolver for FixedImage {
    async fn resolve(&self, _article_url: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

// ---------- wiring ----------

pub fn variants() -> Vec<PromptVariant> {
    ["original", "skeptic", "trend_spotter"]
        .iter()
        .map(|n| PromptVariant::new(*n, "Analyze:\n{content}"))
        .collect()
}

pub fn settings(min_posts: u32, max_posts: u32) -> CycleSettings {
    CycleSettings {
        quiet_hours: QuietHours::new(22, 7),
        timezone: Some(chrono_tz::Tz::UTC),
        quota: PostingQuota::new(min_posts, max_posts),
        ..CycleSettings::default()
    }
}

pub fn orchestrator(
    feeds: Vec<Box<dyn FeedProvider>>,
    analyzer: Arc<ScriptedAnalyzer>,
    publisher: Arc<RecordingPublisher>,
    history: HistoryStore,
    settings: CycleSettings,
) -> CycleOrchestrator {
    CycleOrchestrator::new(
        feeds,
        analyzer,
        publisher,
        history,
        PromptRotator::new(variants()).unwrap(),
        settings,
    )
    .with_rng_seed(42)
}
