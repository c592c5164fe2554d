//! Metrics and telemetry for the stitching pipeline
//!
//! Prometheus metrics covering run outcomes, cache effectiveness,
//! partition fan-out, and stage latency. Everything is registered once
//! through `lazy_static` and scraped via [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Run Counters ===

    /// Total stitching runs
    pub static ref RUNS_TOTAL: CounterVec = register_counter_vec!(
        "stormstitch_runs_total",
        "Total stitching runs by outcome",
        &["status"]
    ).unwrap();

    /// Result cache lookups
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "stormstitch_cache_lookups_total",
        "Result cache lookups by outcome",
        &["outcome"]
    ).unwrap();

    /// Partition outcomes
    pub static ref PARTITIONS_TOTAL: CounterVec = register_counter_vec!(
        "stormstitch_partitions_total",
        "Stitched partitions by outcome",
        &["status"]
    ).unwrap();

    // === Latency Histograms ===

    /// Per-stage pipeline latency
    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "stormstitch_stage_duration_seconds",
        "Pipeline stage latency in seconds",
        &["stage"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Volume Gauges ===

    /// Points admitted by the most recent filter pass
    pub static ref POINTS_SELECTED: Gauge = register_gauge!(
        "stormstitch_points_selected",
        "Points admitted by the most recent filter pass"
    ).unwrap();

    /// Strikes emitted by the most recent run
    pub static ref STRIKES_EMITTED: Gauge = register_gauge!(
        "stormstitch_strikes_emitted",
        "Strikes emitted by the most recent run"
    ).unwrap();

    /// Entries currently held by the result cache
    pub static ref CACHE_ENTRIES: Gauge = register_gauge!(
        "stormstitch_cache_entries",
        "Entries currently held by the result cache"
    ).unwrap();

    // === Error Counters ===

    /// Total errors by type and stage
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "stormstitch_errors_total",
        "Total errors by type and stage",
        &["error_type", "stage"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a completed run
#[inline]
pub fn record_run(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    RUNS_TOTAL.with_label_values(&[status]).inc();

    STAGE_DURATION
        .with_label_values(&["run"])
        .observe(duration_secs);
}

/// Record a result cache lookup
#[inline]
pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record one partition's outcome
#[inline]
pub fn record_partition(success: bool) {
    let status = if success { "success" } else { "error" };
    PARTITIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a stage latency observation
#[inline]
pub fn record_stage(stage: &str, duration_secs: f64) {
    STAGE_DURATION
        .with_label_values(&[stage])
        .observe(duration_secs);
}

/// Record an error
#[inline]
pub fn record_error(error_type: &str, stage: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type, stage]).inc();
}

/// Update the selected point count gauge
#[inline]
pub fn update_points_selected(count: usize) {
    POINTS_SELECTED.set(count as f64);
}

/// Update the emitted strike count gauge
#[inline]
pub fn update_strikes_emitted(count: usize) {
    STRIKES_EMITTED.set(count as f64);
}

/// Update the cache entry count gauge
#[inline]
pub fn update_cache_entries(count: usize) {
    CACHE_ENTRIES.set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_run() {
        record_run(0.05, true);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("stormstitch_runs_total"));
    }

    #[test]
    fn test_gather_metrics() {
        update_points_selected(1_234);
        update_strikes_emitted(7);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("stormstitch_points_selected"));
        assert!(metrics.contains("stormstitch_strikes_emitted"));
    }

    #[test]
    fn test_cache_lookup_outcomes() {
        record_cache_lookup(true);
        record_cache_lookup(false);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("stormstitch_cache_lookups_total"));
    }
}
