/// Metrics collection and reporting module
///
/// Prometheus-backed counters for reward fetches, source fallthrough,
/// claim outcomes and realtime reconnects. Recording is a no-op until
/// `init_metrics` installs the recorder, so library consumers and tests
/// pay nothing for the instrumentation.

use anyhow::{Context, Result};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

/// Installed Prometheus recorder handle
static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the metrics recorder and describe the service's series
pub fn init_metrics() -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    describe_counter!(
        "rewardbot_reward_fetch_total",
        "Reward fetch attempts by chain, source and outcome"
    );
    describe_counter!(
        "rewardbot_claims_total",
        "Claim lifecycle transitions by chain and outcome"
    );
    describe_counter!(
        "rewardbot_realtime_reconnects_total",
        "Reconnect attempts made by the realtime channel"
    );
    describe_counter!(
        "rewardbot_refreshes_total",
        "Cache refreshes by trigger (poll, push, claim)"
    );

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        // Another caller won the race; their handle serves /metrics
        return Ok(());
    }

    info!("Metrics recorder installed");
    Ok(())
}

/// Render the current metrics in Prometheus exposition format
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record one reward-fetch outcome for a source
pub fn record_fetch(chain_id: u32, source: &'static str, outcome: &'static str) {
    counter!(
        "rewardbot_reward_fetch_total",
        1,
        "chain" => chain_id.to_string(),
        "source" => source,
        "outcome" => outcome
    );
}

/// Record one claim lifecycle outcome
pub fn record_claim(chain_id: u32, outcome: &'static str) {
    counter!(
        "rewardbot_claims_total",
        1,
        "chain" => chain_id.to_string(),
        "outcome" => outcome
    );
}

/// Record one realtime reconnect attempt
pub fn record_reconnect(attempt: u32) {
    counter!(
        "rewardbot_realtime_reconnects_total",
        1,
        "attempt" => attempt.to_string()
    );
}

/// Record one cache refresh by trigger
pub fn record_refresh(trigger: &'static str) {
    counter!("rewardbot_refreshes_total", 1, "trigger" => trigger);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // No recorder installed in this process yet; these must not panic
        record_fetch(8453, "contract", "hit");
        record_claim(8453, "confirmed");
        record_reconnect(1);
        record_refresh("poll");
    }
}
