use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

/// Register descriptions for the cycle series once per process.
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cycle_runs_total", "Cycles that acquired the run guard.");
        describe_counter!("cycle_overlaps_total", "Triggers ignored because a cycle was running.");
        describe_counter!("cycle_quiet_total", "Cycles skipped by quiet hours.");
        describe_counter!("cycle_aborts_total", "Cycles aborted by a history write failure.");
        describe_counter!("ai_calls_total", "AI analyzer calls by outcome (ok|error|timeout).");
        describe_counter!("posts_total", "Articles delivered to the destination.");
        describe_counter!("publish_failures_total", "Failed or timed out deliveries.");
        describe_gauge!("cycle_last_success_ts", "Unix time of the last cycle that completed.");
        describe_gauge!("history_entries", "Entries in the history store after the last cycle.");
        describe_histogram!("cycle_duration_ms", "Wall time of one cycle in milliseconds.");
    });
}

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
/// Must run inside a tokio runtime.
pub fn install_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics_addr {addr:?}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    describe_all();
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}
