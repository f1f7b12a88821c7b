//! Metrics definitions for the matchmaking service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mm_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Job handling is a handful of store round trips (p99 < 100ms)
        .set_buckets_for_metric(
            Matcher::Prefix("mm_job".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set job duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Queue
// ============================================================================

/// Record a handled queue job.
///
/// Metric: `mm_jobs_processed_total`
/// Labels: `lane`, `kind`, `status`
pub fn record_job(lane: &'static str, kind: &'static str, status: &'static str) {
    counter!(
        "mm_jobs_processed_total",
        "lane" => lane,
        "kind" => kind,
        "status" => status
    )
    .increment(1);
}

/// Record how long a job took to apply.
///
/// Metric: `mm_job_duration_seconds`
/// Labels: `kind`
pub fn record_job_duration(kind: &'static str, duration: Duration) {
    histogram!("mm_job_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

// ============================================================================
// Store and rooms
// ============================================================================

/// A guarded commit lost to a concurrent writer.
///
/// Metric: `mm_store_conflicts_total`
pub fn record_store_conflict() {
    counter!("mm_store_conflicts_total").increment(1);
}

/// Metric: `mm_rooms_created_total`
pub fn record_room_created() {
    counter!("mm_rooms_created_total").increment(1);
}

/// Metric: `mm_matches_total`
pub fn record_match() {
    counter!("mm_matches_total").increment(1);
}

// ============================================================================
// Choreography
// ============================================================================

/// Metric: `mm_choreographies_active`
pub fn choreography_started() {
    gauge!("mm_choreographies_active").increment(1.0);
}

/// Record a finished choreography.
///
/// Metric: `mm_choreographies_active`, `mm_choreographies_total`
/// Labels: `outcome` (completed, aborted, cancelled)
pub fn choreography_finished(outcome: &'static str) {
    gauge!("mm_choreographies_active").decrement(1.0);
    counter!("mm_choreographies_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Gateway
// ============================================================================

/// Set the number of open gateway connections on this instance.
///
/// Metric: `mm_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mm_connections_active").set(count as f64);
}

// ============================================================================
// Errors
// ============================================================================

/// Record a handling failure.
///
/// Metric: `mm_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_error(operation: &'static str, error_type: &'static str) {
    counter!(
        "mm_errors_total",
        "operation" => operation,
        "error_type" => error_type
    )
    .increment(1);
}
