//! # Prompt Rotator
//! Round-robin over the fixed prompt variant set.
//!
//! The cursor lives only in memory: a restart begins again at the first
//! variant. Any window of N consecutive `next()` calls yields every variant
//! exactly once, in load order.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One named analysis style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub name: String,
    pub emoji: String,
    /// Prompt text; `{content}` (or `{content_summary}`) is replaced by the article.
    pub prompt: String,
    /// Message template for posts produced with this style.
    pub template: Option<String>,
}

impl PromptVariant {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emoji: "🚀".to_string(),
            prompt: prompt.into(),
            template: None,
        }
    }

    /// Prompt with the article content substituted in.
    pub fn render(&self, content: &str) -> String {
        if self.prompt.contains("{content}") {
            self.prompt.replace("{content}", content)
        } else if self.prompt.contains("{content_summary}") {
            self.prompt.replace("{content_summary}", content)
        } else {
            format!("{}\n\n{}", self.prompt.trim_end(), content)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptRotator {
    variants: Vec<PromptVariant>,
    cursor: usize,
}

impl PromptRotator {
    pub fn new(variants: Vec<PromptVariant>) -> Result<Self> {
        if variants.is_empty() {
            bail!("prompt rotator needs at least one variant");
        }
        Ok(Self {
            variants,
            cursor: 0,
        })
    }

    /// Returns the variant at the cursor, then advances it (mod N).
    pub fn next(&mut self) -> &PromptVariant {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.variants.len();
        &self.variants[idx]
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variants(&self) -> &[PromptVariant] {
        &self.variants
    }
}
