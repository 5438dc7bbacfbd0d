// src/config/mod.rs
pub mod ai;
pub mod app;
pub mod prompts;

pub use ai::AiConfig;
pub use app::{AppConfig, FeedConfig, QuotaConfig, ScheduleConfig, TimeoutConfig};
pub use prompts::{load_prompts_from, parse_prompts};
