//! Prometheus metrics for the sweeper

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for the exporter
/// endpoint.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("sweep_cycle_duration_seconds".to_string()),
        &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
    )?;
    let handle = builder.install_recorder()?;
    Ok(handle)
}

/// Record one classified probe result.
pub fn record_probe(verdict: &'static str) {
    counter!("sweep_probes_total", "verdict" => verdict).increment(1);
}

/// Record one finished reconciliation cycle.
pub fn record_cycle(duration_secs: f64) {
    counter!("sweep_cycles_total").increment(1);
    histogram!("sweep_cycle_duration_seconds").record(duration_secs);
}

/// Record one deletion attempt.
pub fn record_deletion(result: &'static str) {
    counter!("sweep_deletions_total", "result" => result).increment(1);
}
