//! AI adapter: analyzer abstraction + Gemini provider + tolerant verdict parsing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ai::AiConfig;
use crate::ingest::types::ArticleCandidate;
use crate::rotator::PromptVariant;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Structured opportunity assessment for one article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub is_opportunity: bool,
    pub opportunity_type: Option<String>,
    pub risk_level: Option<String>,
    pub explanation: Option<String>,
    /// 0.0 ..= 1.0 when the model reports one.
    pub confidence: Option<f32>,
}

impl Verdict {
    /// An opportunity whose confidence (1.0 when unreported) reaches `threshold`.
    pub fn qualifies(&self, threshold: f32) -> bool {
        self.is_opportunity && self.confidence.unwrap_or(1.0) >= threshold
    }
}

/// Trait object used by the orchestrator (and stubbed in tests).
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        article: &'a ArticleCandidate,
        variant: &'a PromptVariant,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynAnalyzer = Arc<dyn Analyzer>;

/// Appended to every variant so all styles answer in the same shape.
pub const RESPONSE_CONTRACT: &str = "Respond with ONE JSON object and nothing else:\n{\"is_opportunity\": true/false, \"opportunity_type\": \"funding round | launch | market trend | technology | partnership | acquisition | IPO | other\", \"risk_level\": \"LOW/MEDIUM/HIGH\", \"explanation\": \"max 2 sentences\", \"confidence\": 0.0-1.0}";

/// Article block substituted into the prompt's `{content}` placeholder.
pub fn article_content(article: &ArticleCandidate) -> String {
    let summary: String = article.summary_text.chars().take(500).collect();
    format!(
        "Source: {}\nTitle: {}\nSummary: {}\nLink: {}",
        article.source_name,
        article.title,
        summary,
        article.link.as_deref().unwrap_or("N/A")
    )
}

pub fn build_prompt(article: &ArticleCandidate, variant: &PromptVariant) -> String {
    format!(
        "{}\n\n{}",
        variant.render(&article_content(article)),
        RESPONSE_CONTRACT
    )
}

/// Factory: build an analyzer according to config and environment variables.
///
/// * `AI_TEST_MODE=mock` or provider "mock" → deterministic mock.
/// * provider "gemini" without a key → disabled analyzer (every call fails fast).
/// * provider "gemini" with a key → real Gemini client bounded by `timeout`.
pub fn build_analyzer(cfg: &AiConfig, timeout: Duration) -> Result<DynAnalyzer> {
    let mock_env = std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);
    let provider = cfg.provider();
    if mock_env || provider == "mock" {
        return Ok(Arc::new(MockAnalyzer::opportunity()));
    }

    match provider.as_str() {
        "gemini" => match cfg.resolved_api_key() {
            Some(key) => Ok(Arc::new(GeminiAnalyzer::new(key, cfg.model.clone(), timeout)?)),
            None => {
                tracing::warn!("GEMINI_API_KEY not set, AI analysis disabled");
                Ok(Arc::new(DisabledAnalyzer))
            }
        },
        other => bail!("Unsupported AI provider in config: {other}"),
    }
}

/// Startup smoke test. Logs the outcome, never fails.
pub async fn quick_probe(analyzer: &dyn Analyzer, variant: &PromptVariant) {
    let sample = ArticleCandidate::new(
        "probe",
        "Acme AI raises $20M Series A led by Example Ventures",
        "The two-year-old startup builds agents for logistics and plans to double headcount.",
        Some("https://example.com/acme-series-a".into()),
    );
    match analyzer.analyze(&sample, variant).await {
        Ok(v) => tracing::info!(provider = analyzer.provider_name(), verdict = ?v, "AI quick probe ok"),
        Err(e) => tracing::warn!(provider = analyzer.provider_name(), error = ?e, "AI quick probe failed"),
    }
}

// ------------------------------------------------------------
// Concrete analyzers
// ------------------------------------------------------------

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client. Requires an API key.
pub struct GeminiAnalyzer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("vc-news-analyzer/0.1")
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building gemini http client")?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: GEMINI_BASE.to_string(),
        })
    }

    /// Point at a different endpoint (proxies, local fakes).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn analyze_impl(&self, article: &ArticleCandidate, variant: &PromptVariant) -> Result<Verdict> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            temperature: f32,
            response_mime_type: &'static str,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Req<'a> {
            contents: Vec<Content<'a>>,
            generation_config: GenerationConfig,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
            error: Option<ApiError>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Option<RespContent>,
        }
        #[derive(Deserialize)]
        struct RespContent {
            #[serde(default)]
            parts: Vec<RespPart>,
        }
        #[derive(Deserialize)]
        struct RespPart {
            #[serde(default)]
            text: String,
        }
        #[derive(Deserialize)]
        struct ApiError {
            message: String,
        }

        let prompt = build_prompt(article, variant);
        let req = Req {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                response_mime_type: "application/json",
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .context("gemini request")?;

        let status = resp.status();
        let body: Resp = resp.json().await.context("gemini response body")?;
        if let Some(err) = body.error {
            bail!("gemini error ({status}): {}", err.message);
        }
        if !status.is_success() {
            bail!("gemini HTTP {status}");
        }

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            bail!("gemini returned no text");
        }
        parse_verdict(&text)
    }
}

impl Analyzer for GeminiAnalyzer {
    fn analyze<'a>(
        &'a self,
        article: &'a ArticleCandidate,
        variant: &'a PromptVariant,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        Box::pin(self.analyze_impl(article, variant))
    }
    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

/// Fails every call; used when no API key is configured.
pub struct DisabledAnalyzer;

impl Analyzer for DisabledAnalyzer {
    fn analyze<'a>(
        &'a self,
        _article: &'a ArticleCandidate,
        _variant: &'a PromptVariant,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        Box::pin(async { Err(anyhow!("AI analysis disabled (no API key)")) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Returns a fixed verdict; for local runs and tests.
#[derive(Clone)]
pub struct MockAnalyzer {
    pub fixed: Verdict,
}

impl MockAnalyzer {
    pub fn opportunity() -> Self {
        Self {
            fixed: Verdict {
                is_opportunity: true,
                opportunity_type: Some("funding round".into()),
                risk_level: Some("MEDIUM".into()),
                explanation: Some("Mock analysis".into()),
                confidence: Some(0.9),
            },
        }
    }
}

impl Analyzer for MockAnalyzer {
    fn analyze<'a>(
        &'a self,
        _article: &'a ArticleCandidate,
        _variant: &'a PromptVariant,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Response parsing
// ------------------------------------------------------------

/// Accepts fenced or bare JSON; a verdict object, `{"item_1": {...}}`, or `[{...}]`.
pub fn parse_verdict(text: &str) -> Result<Verdict> {
    let json = strip_code_fence(text);
    let value: Value = serde_json::from_str(json)
        .with_context(|| format!("verdict is not JSON: {}", preview(json)))?;

    let obj = match &value {
        Value::Object(m) if m.contains_key("is_opportunity") => &value,
        Value::Object(m) => m
            .get("item_1")
            .or_else(|| m.values().find(|v| v.get("is_opportunity").is_some()))
            .ok_or_else(|| anyhow!("verdict object has no is_opportunity"))?,
        Value::Array(a) => a
            .first()
            .ok_or_else(|| anyhow!("verdict array is empty"))?,
        _ => bail!("unexpected verdict shape: {}", preview(json)),
    };

    let is_opportunity = match obj.get("is_opportunity") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => bail!("verdict lacks a usable is_opportunity"),
    };

    let text_field = |k: &str| {
        obj.get(k)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let confidence = obj
        .get("confidence")
        .and_then(|c| match c {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
            _ => None,
        })
        .filter(|c| c.is_finite())
        .map(|c| if c > 1.0 { c / 100.0 } else { c })
        .map(|c| c.clamp(0.0, 1.0) as f32);

    Ok(Verdict {
        is_opportunity,
        opportunity_type: text_field("opportunity_type"),
        risk_level: text_field("risk_level").map(|r| r.to_ascii_uppercase()),
        explanation: text_field("explanation"),
        confidence,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    if let Some(rest) = t.split_once("```json").map(|(_, r)| r) {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some(rest) = t.split_once("```").map(|(_, r)| r) {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    t
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}
