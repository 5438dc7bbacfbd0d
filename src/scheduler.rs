// src/scheduler.rs
use anyhow::{bail, Result};
use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleConfig;
use crate::orchestrator::CycleOrchestrator;

/// Periodic trigger for `run_cycle`. The first tick fires immediately; each
/// tick awaits the cycle, so cycles never overlap. Ends with an error after
/// `max_consecutive_failures` aborted cycles in a row.
pub fn spawn_cycle_scheduler(
    orchestrator: Arc<CycleOrchestrator>,
    cfg: ScheduleConfig,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let limit = cfg.max_consecutive_failures.max(1);
        let mut failures: u32 = 0;
        loop {
            ticker.tick().await;
            match orchestrator.run_cycle().await {
                Ok(report) => {
                    failures = 0;
                    gauge!("cycle_last_success_ts").set(chrono::Utc::now().timestamp() as f64);
                    tracing::debug!(target: "cycle", posted = report.posted, "tick done");
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        target: "cycle",
                        error = ?e,
                        failures,
                        limit,
                        "cycle failed"
                    );
                    if failures >= limit {
                        bail!("giving up after {failures} consecutive failed cycles: {e:#}");
                    }
                }
            }
        }
    })
}
