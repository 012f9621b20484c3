//! Metrics definitions for the SFU service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sfu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (registry, room, session)
//! - `operation`: bounded by `MediaEngine` methods (~6 values)
//! - `message_type`: bounded by signaling request types (~25 values)
//! - `status`: success, error, timeout
//!
//! Room, peer and producer ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Engine calls: in-process today, remote workers tolerate up to the engine timeout
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_engine".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
                10.000,
            ],
        )
        .map_err(|e| format!("Failed to set engine call buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_signaling".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room & Peer Metrics (Gauges)
// ============================================================================

/// Set the number of active rooms.
///
/// Metric: `sfu_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_rooms_active").set(count as f64);
}

/// Set the number of peers joined to any room.
///
/// Metric: `sfu_peers_active`
/// Labels: none
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_peers_active").set(count as f64);
}

// ============================================================================
// Engine Metrics
// ============================================================================

/// Record a media engine call.
///
/// Metrics: `sfu_engine_calls_total`, `sfu_engine_call_duration_seconds`
/// Labels: `operation`, `status` (success, error, timeout, panic)
///
/// Cardinality: ~6 operations x 4 statuses
pub fn record_engine_call(operation: &'static str, status: &'static str, duration: Duration) {
    counter!(
        "sfu_engine_calls_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    histogram!("sfu_engine_call_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record a processed signaling request.
///
/// Metric: `sfu_signaling_messages_total`
/// Labels: `message_type`, `status` (success or an `SfuError` type label)
///
/// Cardinality: ~25 message types x 10 statuses
pub fn record_signaling_message(message_type: &'static str, status: &'static str) {
    counter!(
        "sfu_signaling_messages_total",
        "message_type" => message_type,
        "status" => status
    )
    .increment(1);
}

/// Record signaling request latency.
///
/// Metric: `sfu_signaling_latency_seconds`
/// Labels: `message_type`
pub fn record_signaling_latency(message_type: &'static str, duration: Duration) {
    histogram!("sfu_signaling_latency_seconds", "message_type" => message_type)
        .record(duration.as_secs_f64());
}

/// Set the number of open signaling connections.
///
/// Metric: `sfu_signaling_connections_active`
/// Labels: none
pub fn set_signaling_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_signaling_connections_active").set(count as f64);
}

// ============================================================================
// Chat Metrics
// ============================================================================

/// Record a chat message stored (user or system).
///
/// Metric: `sfu_chat_messages_total`
/// Labels: `message_type` (text, emoji, system, file, image)
pub fn record_chat_message(message_type: &'static str) {
    counter!("sfu_chat_messages_total", "message_type" => message_type).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `sfu_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room, session)
///
/// Cardinality: 3 (bounded by `ActorType` enum)
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record an actor panic.
///
/// Metric: `sfu_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("sfu_actor_panics_total", "actor_type" => actor_type).increment(1);
}
