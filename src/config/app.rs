// src/config/app.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ai::AiConfig;
use crate::eligibility::QuietHours;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_CONFIG_PATH: &str = "VCNEWS_CONFIG_PATH";

fn default_prompts_path() -> PathBuf {
    PathBuf::from("config/prompts.toml")
}
fn default_history_path() -> PathBuf {
    PathBuf::from("state/sent_news_history.json")
}
fn default_retention_days() -> u32 {
    7
}
fn default_threshold() -> f32 {
    0.5
}
fn default_max_items() -> usize {
    10
}

/// One RSS source, addressed by display name.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_interval")]
    pub interval_secs: u64,
    /// Scheduler gives up after this many cycles in a row fail systemically.
    #[serde(default = "ScheduleConfig::default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl ScheduleConfig {
    fn default_interval() -> u64 {
        3600
    }
    fn default_max_failures() -> u32 {
        10
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval(),
            max_consecutive_failures: Self::default_max_failures(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "QuotaConfig::default_min")]
    pub min_posts: u32,
    #[serde(default = "QuotaConfig::default_max")]
    pub max_posts: u32,
    /// Upper bound on AI calls in a single tick, independent of the post quota.
    #[serde(default = "QuotaConfig::default_max_analyses")]
    pub max_analyses_per_tick: usize,
}

impl QuotaConfig {
    fn default_min() -> u32 {
        1
    }
    fn default_max() -> u32 {
        3
    }
    fn default_max_analyses() -> usize {
        20
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            min_posts: Self::default_min(),
            max_posts: Self::default_max(),
            max_analyses_per_tick: Self::default_max_analyses(),
        }
    }
}

/// Per-call budgets for every outbound request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "TimeoutConfig::default_feed")]
    pub feed_secs: u64,
    #[serde(default = "TimeoutConfig::default_ai")]
    pub ai_secs: u64,
    #[serde(default = "TimeoutConfig::default_image")]
    pub image_secs: u64,
    #[serde(default = "TimeoutConfig::default_publish")]
    pub publish_secs: u64,
}

impl TimeoutConfig {
    fn default_feed() -> u64 {
        15
    }
    fn default_ai() -> u64 {
        60
    }
    fn default_image() -> u64 {
        5
    }
    fn default_publish() -> u64 {
        10
    }

    pub fn feed(&self) -> Duration {
        Duration::from_secs(self.feed_secs)
    }
    pub fn ai(&self) -> Duration {
        Duration::from_secs(self.ai_secs)
    }
    pub fn image(&self) -> Duration {
        Duration::from_secs(self.image_secs)
    }
    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            feed_secs: Self::default_feed(),
            ai_secs: Self::default_ai(),
            image_secs: Self::default_image(),
            publish_secs: Self::default_publish(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN
    #[serde(default)]
    pub bot_token: String,
    /// "ENV" means: read from TELEGRAM_CHAT_ID
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    #[serde(default = "default_prompts_path")]
    pub prompts_path: PathBuf,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    /// IANA name, e.g. "Europe/Prague". Machine local time when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_max_items")]
    pub max_items_per_feed: usize,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// e.g. "0.0.0.0:9000"; Prometheus exporter stays off when absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl AppConfig {
    /// Parse and validate a TOML document. Secrets are left unresolved.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing app config toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading app config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&data)?;
        cfg.resolve_relative_paths(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(cfg)
    }

    /// $VCNEWS_CONFIG_PATH, then config/app.toml.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_file(path)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn timezone(&self) -> Result<Option<chrono_tz::Tz>> {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("invalid timezone {name:?}: {e}")),
        }
    }

    /// Telegram credentials with "ENV" resolved. `None` when unset.
    pub fn telegram_credentials(&self) -> Option<(String, String)> {
        let token = resolve_env(&self.telegram.bot_token, "TELEGRAM_BOT_TOKEN")?;
        let chat = resolve_env(&self.telegram.chat_id, "TELEGRAM_CHAT_ID")?;
        Some((token, chat))
    }

    fn validate(&mut self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("config must list at least one feed");
        }
        let mut names = HashSet::new();
        for f in &mut self.feeds {
            f.name = f.name.trim().to_string();
            f.url = f.url.trim().to_string();
            if f.name.is_empty() || f.url.is_empty() {
                bail!("feed entries need a non-empty name and url");
            }
            if !names.insert(f.name.clone()) {
                bail!("duplicate feed name: {}", f.name);
            }
        }

        let q = &self.quota;
        if q.min_posts == 0 || q.min_posts > q.max_posts {
            bail!(
                "invalid posting quota range {}..={} (need 1 <= min <= max)",
                q.min_posts,
                q.max_posts
            );
        }
        if q.max_analyses_per_tick == 0 {
            bail!("quota.max_analyses_per_tick must be positive");
        }
        if self.quiet_hours.start_hour > 23 || self.quiet_hours.end_hour > 23 {
            bail!("quiet hours must be within 0..=23");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be positive");
        }
        let t = &self.timeouts;
        if t.feed_secs == 0 || t.ai_secs == 0 || t.image_secs == 0 || t.publish_secs == 0 {
            bail!("all timeouts must be positive");
        }
        if self.retention_days == 0 {
            bail!("retention_days must be positive");
        }
        if self.max_items_per_feed == 0 {
            bail!("max_items_per_feed must be positive");
        }
        if !self.relevance_threshold.is_finite() {
            self.relevance_threshold = default_threshold();
        }
        self.relevance_threshold = self.relevance_threshold.clamp(0.0, 1.0);
        self.timezone()?;
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        // Relative paths in the file are taken relative to the working directory,
        // except the prompts file which usually sits next to the config.
        if self.prompts_path.is_relative() && !self.prompts_path.exists() {
            let alt = base.join(&self.prompts_path);
            if alt.exists() {
                self.prompts_path = alt;
            }
        }
    }
}

/// Literal value, or the env var when the value is "ENV". Empty → `None`.
pub(crate) fn resolve_env(raw: &str, var: &str) -> Option<String> {
    let v = raw.trim();
    let out = if v.eq_ignore_ascii_case("env") {
        std::env::var(var).ok()?
    } else {
        v.to_string()
    };
    let out = out.trim().to_string();
    (!out.is_empty()).then_some(out)
}
