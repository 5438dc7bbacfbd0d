// src/config/prompts.rs
//! Loader for the prompt variant set (TOML or JSON).
//!
//! TOML:
//! ```toml
//! [[variants]]
//! name = "original"
//! emoji = "🚀"
//! prompt = "... {content} ..."
//! template = "optional message template"
//! ```
//! JSON: either a `[{...}, ...]` array of the same objects, or an object keyed
//! by variant name (`{"original": {"prompt": "...", "emoji": "🚀"}}`), which is
//! ordered by name.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::rotator::PromptVariant;

#[derive(Debug, Deserialize)]
struct VariantRaw {
    name: String,
    #[serde(default)]
    emoji: String,
    prompt: String,
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyedRaw {
    #[serde(default)]
    emoji: String,
    prompt: String,
    #[serde(default)]
    template: Option<String>,
}

pub fn load_prompts_from(path: &Path) -> Result<Vec<PromptVariant>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading prompt variants from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_prompts(&content, ext.as_str())
}

pub fn parse_prompts(s: &str, hint_ext: &str) -> Result<Vec<PromptVariant>> {
    let try_toml = hint_ext == "toml" || s.contains("[[variants]]");
    let raw = if try_toml {
        parse_toml(s).or_else(|e| parse_json(s).map_err(|_| e))?
    } else {
        parse_json(s).or_else(|e| parse_toml(s).map_err(|_| e))?
    };
    clean_variants(raw)
}

fn parse_toml(s: &str) -> Result<Vec<VariantRaw>> {
    #[derive(Deserialize)]
    struct TomlPrompts {
        variants: Vec<VariantRaw>,
    }
    let v: TomlPrompts = toml::from_str(s).context("parsing prompt variants toml")?;
    Ok(v.variants)
}

fn parse_json(s: &str) -> Result<Vec<VariantRaw>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonPrompts {
        List(Vec<VariantRaw>),
        Keyed(BTreeMap<String, KeyedRaw>),
    }
    let v: JsonPrompts =
        serde_json::from_str(s).map_err(|e| anyhow!("parsing prompt variants json: {e}"))?;
    Ok(match v {
        JsonPrompts::List(list) => list,
        JsonPrompts::Keyed(map) => map
            .into_iter()
            .map(|(name, k)| VariantRaw {
                name,
                emoji: k.emoji,
                prompt: k.prompt,
                template: k.template,
            })
            .collect(),
    })
}

fn clean_variants(raw: Vec<VariantRaw>) -> Result<Vec<PromptVariant>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for r in raw {
        let name = r.name.trim().to_string();
        if name.is_empty() {
            bail!("prompt variant with empty name");
        }
        if r.prompt.trim().is_empty() {
            bail!("prompt variant {name:?} has an empty prompt");
        }
        if !seen.insert(name.clone()) {
            bail!("duplicate prompt variant: {name}");
        }
        let emoji = if r.emoji.trim().is_empty() {
            "🚀".to_string()
        } else {
            r.emoji.trim().to_string()
        };
        out.push(PromptVariant {
            name,
            emoji,
            prompt: r.prompt,
            template: r.template.filter(|t| !t.trim().is_empty()),
        });
    }
    if out.is_empty() {
        bail!("prompt variant set is empty");
    }
    Ok(out)
}
