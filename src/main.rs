//! VC News Analyzer: binary entrypoint.
//! Loads configuration, wires feeds, analyzer and destination, then runs the
//! hourly cycle until Ctrl-C or until the scheduler gives up.

use anyhow::{anyhow, Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vc_news_analyzer::analyze::{build_analyzer, quick_probe};
use vc_news_analyzer::config::{load_prompts_from, AppConfig};
use vc_news_analyzer::history::HistoryStore;
use vc_news_analyzer::ingest::providers::rss::{RssFeedProvider, USER_AGENT};
use vc_news_analyzer::ingest::types::FeedProvider;
use vc_news_analyzer::notify::{
    HtmlImageResolver, LogPublisher, Publisher, SlackPublisher, TelegramPublisher,
};
use vc_news_analyzer::orchestrator::{CycleOrchestrator, CycleSettings};
use vc_news_analyzer::rotator::PromptRotator;
use vc_news_analyzer::scheduler::spawn_cycle_scheduler;

/// `RUST_LOG` wins; otherwise info for this crate, warn for dependencies.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vc_news_analyzer=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn build_publisher(cfg: &AppConfig, http: &reqwest::Client) -> Arc<dyn Publisher> {
    if let Some((token, chat_id)) = cfg.telegram_credentials() {
        tracing::info!("publishing to Telegram");
        return Arc::new(
            TelegramPublisher::new(token, chat_id)
                .with_client(http.clone())
                .with_timeout(cfg.timeouts.publish()),
        );
    }
    if let Some(url) = cfg.slack_webhook_url.clone().filter(|u| !u.trim().is_empty()) {
        tracing::info!("publishing to Slack webhook");
        return Arc::new(
            SlackPublisher::new(url)
                .with_client(http.clone())
                .with_timeout(cfg.timeouts.publish()),
        );
    }
    tracing::warn!("no Telegram or Slack credentials, posts will only be logged");
    Arc::new(LogPublisher)
}

async fn run() -> Result<()> {
    let cfg = AppConfig::load_default()?;

    if let Some(addr) = cfg.metrics_addr.as_deref() {
        vc_news_analyzer::metrics::install_exporter(addr)?;
    }

    let variants = load_prompts_from(&cfg.prompts_path)?;
    let rotator = PromptRotator::new(variants)?;
    tracing::info!(
        feeds = cfg.feeds.len(),
        styles = rotator.len(),
        interval_secs = cfg.schedule.interval_secs,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("building http client")?;

    let providers: Vec<Box<dyn FeedProvider>> = cfg
        .feeds
        .iter()
        .map(|f| {
            Box::new(RssFeedProvider::from_config(f, http.clone(), cfg.max_items_per_feed))
                as Box<dyn FeedProvider>
        })
        .collect();

    let analyzer = build_analyzer(&cfg.ai, cfg.timeouts.ai())?;
    if std::env::var("AI_QUICK_PROBE").is_ok_and(|v| v == "1") {
        if let Some(first) = rotator.variants().first() {
            quick_probe(analyzer.as_ref(), first).await;
        }
    }

    let publisher = build_publisher(&cfg, &http);
    let images = Arc::new(HtmlImageResolver::new(http.clone(), cfg.timeouts.image()));
    let (history, _) = HistoryStore::open(&cfg.history_path);
    let settings = CycleSettings::from_config(&cfg)?;

    let orchestrator = Arc::new(
        CycleOrchestrator::new(providers, analyzer, publisher, history, rotator, settings)
            .with_image_resolver(images),
    );

    let scheduler = spawn_cycle_scheduler(orchestrator, cfg.schedule);
    tokio::select! {
        res = scheduler => res.map_err(|e| anyhow!("scheduler task failed: {e}"))?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal");
            ExitCode::FAILURE
        }
    }
}
