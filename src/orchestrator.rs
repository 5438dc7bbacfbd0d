//! # Cycle Orchestrator
//! One tick: fetch → filter → analyze/post up to a random quota → prune.
//!
//! Only a History Store write failure aborts a tick. Feed, AI, image and
//! publish failures are logged per item and the tick moves on.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge, histogram};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use crate::analyze::ai_adapter::DynAnalyzer;
use crate::config::{AppConfig, QuotaConfig, TimeoutConfig};
use crate::eligibility::{local_hour, select_eligible, QuietHours};
use crate::history::HistoryStore;
use crate::ingest::types::{ArticleCandidate, FeedProvider};
use crate::ingest::run_once;
use crate::notify::{format_message, ImageResolver, NoImages, OutgoingMessage, Publisher};
use crate::rotator::PromptRotator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Filtering,
    Analyzing,
    Done,
}

/// What one `run_cycle` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another cycle was in progress; nothing ran.
    pub overlapped: bool,
    pub quiet: bool,
    pub fetched: usize,
    pub feed_errors: usize,
    pub eligible: usize,
    pub already_posted: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub max_posts: u32,
    pub analyzed: usize,
    pub analysis_failures: usize,
    pub qualified: usize,
    pub posted: u32,
    pub publish_failures: usize,
    pub pruned: usize,
}

/// Closed range the per-tick post quota is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingQuota {
    pub min_posts: u32,
    pub max_posts: u32,
}

impl PostingQuota {
    pub fn new(min_posts: u32, max_posts: u32) -> Self {
        let (lo, hi) = if min_posts <= max_posts {
            (min_posts, max_posts)
        } else {
            (max_posts, min_posts)
        };
        Self {
            min_posts: lo,
            max_posts: hi,
        }
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.random_range(self.min_posts..=self.max_posts)
    }
}

/// Everything the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub quiet_hours: QuietHours,
    pub timezone: Option<Tz>,
    pub quota: PostingQuota,
    pub max_analyses_per_tick: usize,
    pub relevance_threshold: f32,
    pub retention: chrono::Duration,
    pub timeouts: TimeoutConfig,
}

impl CycleSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let QuotaConfig {
            min_posts,
            max_posts,
            max_analyses_per_tick,
        } = cfg.quota;
        Ok(Self {
            quiet_hours: cfg.quiet_hours,
            timezone: cfg.timezone()?,
            quota: PostingQuota::new(min_posts, max_posts),
            max_analyses_per_tick,
            relevance_threshold: cfg.relevance_threshold,
            retention: cfg.retention(),
            timeouts: cfg.timeouts,
        })
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            quiet_hours: QuietHours::default(),
            timezone: None,
            quota: PostingQuota::new(1, 3),
            max_analyses_per_tick: 20,
            relevance_threshold: 0.5,
            retention: chrono::Duration::days(7),
            timeouts: TimeoutConfig::default(),
        }
    }
}

struct CycleState {
    history: HistoryStore,
    rotator: PromptRotator,
    rng: StdRng,
}

pub struct CycleOrchestrator {
    providers: Vec<Box<dyn FeedProvider>>,
    analyzer: DynAnalyzer,
    publisher: Arc<dyn Publisher>,
    images: Arc<dyn ImageResolver>,
    settings: CycleSettings,
    state: Mutex<CycleState>,
    phase: watch::Sender<CyclePhase>,
}

impl CycleOrchestrator {
    pub fn new(
        providers: Vec<Box<dyn FeedProvider>>,
        analyzer: DynAnalyzer,
        publisher: Arc<dyn Publisher>,
        history: HistoryStore,
        rotator: PromptRotator,
        settings: CycleSettings,
    ) -> Self {
        crate::metrics::describe_all();
        gauge!("history_entries").set(history.len() as f64);
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            providers,
            analyzer,
            publisher,
            images: Arc::new(NoImages),
            settings,
            state: Mutex::new(CycleState {
                history,
                rotator,
                rng: StdRng::from_os_rng(),
            }),
            phase,
        }
    }

    pub fn with_image_resolver(mut self, images: Arc<dyn ImageResolver>) -> Self {
        self.images = images;
        self
    }

    /// Deterministic quota draws.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.state.get_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Read access to history between cycles. Waits for a running cycle.
    pub async fn with_history<R>(&self, f: impl FnOnce(&HistoryStore) -> R) -> R {
        let state = self.state.lock().await;
        f(&state.history)
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one tick as if the clock read `now`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let Ok(mut guard) = self.state.try_lock() else {
            tracing::warn!(target: "cycle", "cycle already in progress, ignoring trigger");
            counter!("cycle_overlaps_total").increment(1);
            return Ok(CycleReport {
                overlapped: true,
                ..Default::default()
            });
        };

        let t0 = Instant::now();
        let mut report = CycleReport::default();
        let res = self.run_locked(&mut guard, now, &mut report).await;
        self.enter(CyclePhase::Idle);

        counter!("cycle_runs_total").increment(1);
        histogram!("cycle_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("history_entries").set(guard.history.len() as f64);

        match res {
            Ok(()) => {
                tracing::info!(target: "cycle", report = ?report, "cycle finished");
                Ok(report)
            }
            Err(e) => {
                tracing::error!(target: "cycle", error = ?e, "cycle aborted");
                counter!("cycle_aborts_total").increment(1);
                Err(e)
            }
        }
    }

    fn enter(&self, phase: CyclePhase) {
        tracing::debug!(target: "cycle", ?phase, "phase");
        self.phase.send_replace(phase);
    }

    async fn run_locked(
        &self,
        state: &mut CycleState,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        self.enter(CyclePhase::Fetching);
        let fetched = run_once(&self.providers, self.settings.timeouts.feed()).await;
        report.fetched = fetched.candidates.len();
        report.feed_errors = fetched.failed_feeds.len();

        self.enter(CyclePhase::Filtering);
        let hour = local_hour(now, self.settings.timezone);
        let cutoff = now - self.settings.retention;
        let selection = select_eligible(
            fetched.candidates,
            &state.history,
            self.settings.quiet_hours,
            hour,
            Some(cutoff),
        );
        report.already_posted = selection.already_posted;
        report.duplicates = selection.duplicates;
        report.stale = selection.stale;
        report.eligible = selection.candidates.len();

        if selection.quiet {
            report.quiet = true;
            tracing::info!(target: "cycle", local_hour = hour, "quiet hours, skipping analysis");
            counter!("cycle_quiet_total").increment(1);
        } else {
            self.analyze_and_post(state, &selection.candidates, selection.new_count, now, report)
                .await?;
        }

        self.enter(CyclePhase::Done);
        match state.history.prune(self.settings.retention, now) {
            Ok(n) => report.pruned = n,
            Err(e) => tracing::warn!(target: "history", error = ?e, "prune failed"),
        }
        Ok(())
    }

    async fn analyze_and_post(
        &self,
        state: &mut CycleState,
        candidates: &[ArticleCandidate],
        new_count: usize,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        self.enter(CyclePhase::Analyzing);
        let max_posts = self.settings.quota.draw(&mut state.rng);
        report.max_posts = max_posts;
        tracing::info!(
            target: "cycle",
            eligible = report.eligible,
            new = new_count,
            max_posts,
            "analyzing"
        );

        let mut attempts = 0usize;
        for cand in candidates {
            if report.posted >= max_posts {
                break;
            }
            if attempts >= self.settings.max_analyses_per_tick {
                tracing::info!(target: "cycle", attempts, "analysis cap reached");
                break;
            }
            attempts += 1;
            self.process(state, cand, now, report).await?;
        }
        Ok(())
    }

    /// Analyze one candidate and post it if it qualifies.
    async fn process(
        &self,
        state: &mut CycleState,
        cand: &ArticleCandidate,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let variant = state.rotator.next();

        let verdict = match timeout(
            self.settings.timeouts.ai(),
            self.analyzer.analyze(cand, variant),
        )
        .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!(target: "cycle", error = ?e, title = %cand.title, style = %variant.name, "analysis failed");
                counter!("ai_calls_total", "outcome" => "error").increment(1);
                report.analysis_failures += 1;
                return Ok(());
            }
            Err(_) => {
                tracing::warn!(target: "cycle", title = %cand.title, style = %variant.name, "analysis timed out");
                counter!("ai_calls_total", "outcome" => "timeout").increment(1);
                report.analysis_failures += 1;
                return Ok(());
            }
        };
        counter!("ai_calls_total", "outcome" => "ok").increment(1);
        report.analyzed += 1;

        state
            .history
            .record_analysis(&cand.identity, &variant.name, now)?;

        if !verdict.qualifies(self.settings.relevance_threshold) {
            tracing::debug!(target: "cycle", title = %cand.title, verdict = ?verdict, "not an opportunity");
            return Ok(());
        }
        report.qualified += 1;

        let image_url = self.image_for(cand).await;
        let msg = OutgoingMessage {
            text: format_message(cand, &verdict, variant, now),
            image_url,
        };

        match timeout(self.publish_budget(), self.publisher.publish(&msg)).await {
            Ok(Ok(())) => {
                state
                    .history
                    .record_post(&cand.identity, now)?;
                report.posted += 1;
                counter!("posts_total").increment(1);
                tracing::info!(
                    target: "cycle",
                    title = %cand.title,
                    source = %cand.source_name,
                    style = %variant.name,
                    destination = self.publisher.name(),
                    "posted"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "cycle", error = ?e, title = %cand.title, "publish failed, will retry next tick");
                counter!("publish_failures_total").increment(1);
                report.publish_failures += 1;
            }
            Err(_) => {
                tracing::warn!(target: "cycle", title = %cand.title, "publish timed out, will retry next tick");
                counter!("publish_failures_total").increment(1);
                report.publish_failures += 1;
            }
        }
        Ok(())
    }

    /// Deadline for one whole `publish`. One spare slot beyond the
    /// publisher's request count so its per-request timeouts fire first.
    fn publish_budget(&self) -> std::time::Duration {
        self.settings.timeouts.publish() * (self.publisher.max_requests().max(1) + 1)
    }

    async fn image_for(&self, cand: &ArticleCandidate) -> Option<String> {
        if let Some(url) = &cand.image_url {
            return Some(url.clone());
        }
        let link = cand.link.as_deref()?;
        match timeout(self.settings.timeouts.image(), self.images.resolve(link)).await {
            Ok(found) => found,
            Err(_) => {
                tracing::debug!(target: "cycle", url = link, "image lookup timed out");
                None
            }
        }
    }
}
