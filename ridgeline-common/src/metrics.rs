//! Metrics and Prometheus exposition for the Ridgeline broker.

use metrics::{counter, gauge, histogram};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;

static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Install the Prometheus metrics recorder. Call once at process startup.
pub fn install_recorder() -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map(|_| ())
}

// ============================================================================
// Log / storage metrics
// ============================================================================

pub fn record_bytes_appended(topic: &str, partition: i32, bytes: u64) {
    counter!("ridgeline_log_bytes_appended_total",
        "topic" => topic.to_string(), "partition" => partition.to_string())
        .increment(bytes);
}

pub fn record_segment_roll(topic: &str, partition: i32) {
    counter!("ridgeline_log_segment_rolls_total",
        "topic" => topic.to_string(), "partition" => partition.to_string())
        .increment(1);
}

pub fn record_recovery_truncation(topic: &str, partition: i32, bytes_discarded: u64) {
    counter!("ridgeline_log_recovery_truncations_total",
        "topic" => topic.to_string(), "partition" => partition.to_string())
        .increment(1);
    counter!("ridgeline_log_recovery_bytes_discarded_total",
        "topic" => topic.to_string(), "partition" => partition.to_string())
        .increment(bytes_discarded);
}

// ============================================================================
// Throttle metrics
// ============================================================================

pub fn set_throttle_rate(direction: &str, rate_bytes_per_sec: i64) {
    gauge!("ridgeline_throttle_rate_bytes_per_sec", "direction" => direction.to_string())
        .set(rate_bytes_per_sec as f64);
}

pub fn record_throttle_delay_ms(direction: &str, delay_ms: f64) {
    histogram!("ridgeline_throttle_delay_ms", "direction" => direction.to_string())
        .record(delay_ms);
}

// ============================================================================
// Group coordinator metrics
// ============================================================================

pub fn set_group_generation(group: &str, generation: i32) {
    gauge!("ridgeline_group_generation", "group" => group.to_string()).set(generation as f64);
}

pub fn record_rebalance(group: &str) {
    counter!("ridgeline_group_rebalances_total", "group" => group.to_string()).increment(1);
}

pub fn record_member_evicted(group: &str) {
    counter!("ridgeline_group_members_evicted_total", "group" => group.to_string()).increment(1);
}

// ============================================================================
// Connection / request metrics
// ============================================================================

pub fn set_active_connections(count: i64) {
    gauge!("ridgeline_active_connections").set(count as f64);
}

pub fn record_request(api_key: i16, api_version: i16) {
    counter!("ridgeline_requests_total",
        "api_key" => api_key.to_string(), "api_version" => api_version.to_string())
        .increment(1);
}

pub fn record_request_latency_us(api_key: i16, latency_us: f64) {
    histogram!("ridgeline_request_duration_us", "api_key" => api_key.to_string())
        .record(latency_us);
}

/// Render all registered metrics in Prometheus text exposition format.
#[must_use]
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode prometheus metrics");
        return String::new();
    }

    let uptime = format!(
        "# HELP ridgeline_uptime_seconds Broker uptime in seconds\n\
         # TYPE ridgeline_uptime_seconds gauge\n\
         ridgeline_uptime_seconds {}\n",
        START.elapsed().as_secs_f64()
    );
    format!("{uptime}{}", String::from_utf8_lossy(&buffer))
}
