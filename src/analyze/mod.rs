// src/analyze/mod.rs
//! Opportunity analysis. The model call lives behind `ai_adapter::Analyzer`.

pub mod ai_adapter;

pub use ai_adapter::{build_analyzer, quick_probe, Analyzer, DynAnalyzer, Verdict};
