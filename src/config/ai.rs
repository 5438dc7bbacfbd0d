// src/config/ai.rs
use serde::{Deserialize, Serialize};

use crate::config::app::resolve_env;

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "gemini" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
        }
    }
}

impl AiConfig {
    pub fn provider(&self) -> String {
        self.provider.trim().to_ascii_lowercase()
    }

    /// Resolved key; `None` disables analysis.
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_env(&self.api_key, "GEMINI_API_KEY")
    }
}
