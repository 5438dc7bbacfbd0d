// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod eligibility;
pub mod history;
pub mod ingest;
pub mod rotator;

// AI verdicts and outbound posts
pub mod analyze;
pub mod notify;

// Tick driver
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use analyze::ai_adapter::{Analyzer, DynAnalyzer, Verdict};
pub use eligibility::QuietHours;
pub use history::{HistoryEntry, HistoryStore, LoadOutcome};
pub use ingest::types::{ArticleCandidate, FeedProvider};
pub use notify::{OutgoingMessage, Publisher};
pub use orchestrator::{CycleOrchestrator, CyclePhase, CycleReport, CycleSettings, PostingQuota};
pub use rotator::{PromptRotator, PromptVariant};
