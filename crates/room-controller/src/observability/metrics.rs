//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (registry, room, peer)
//! - `message_type`: bounded by signaling message types (10 values)
//! - `outcome`: `success` plus one value per error kind (~9 values)
//! - `operation`: bounded by provider operations (6 values)
//! - `event`: bounded by push events (2 values)
//!
//! Room ids and peer ids are never used as labels.

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
        // Signaling round trip, includes the provider call
        .set_buckets_for_metric(
            Matcher::Prefix("rc_message".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        // Media engine calls
        .set_buckets_for_metric(
            Matcher::Prefix("rc_provider".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set provider call buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room & Peer Metrics (Gauges)
// ============================================================================

/// Set the number of rooms with a running actor.
///
/// Metric: `rc_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Set the number of peers joined to a room.
///
/// Metric: `rc_peers_active`
/// Labels: none
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_peers_active").set(count as f64);
}

/// Record a room lifecycle transition.
///
/// Metric: `rc_room_lifecycle_total`
/// Labels: `event` (created, retired, creation_failed)
pub fn record_room_lifecycle(event: &str) {
    counter!("rc_room_lifecycle_total", "event" => event.to_string()).increment(1);
}

// ============================================================================
// Actor Mailbox Metrics (Gauges)
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room, peer)
///
/// Cardinality: 3 (bounded by ActorType enum)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record an actor panic event.
///
/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record a processed signaling request.
///
/// Metric: `rc_signaling_requests_total`
/// Labels: `message_type`, `outcome`
///
/// Cardinality: ~90 (10 message types x ~9 outcomes)
pub fn record_signaling_request(message_type: &str, outcome: &str) {
    counter!("rc_signaling_requests_total",
        "message_type" => message_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record signaling message processing latency.
///
/// Metric: `rc_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("rc_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Provider Metrics
// ============================================================================

/// Record a capability provider call.
///
/// Emits:
/// - `rc_provider_call_duration_seconds` histogram (labels: `operation`)
/// - `rc_provider_calls_total` counter (labels: `operation`, `status`)
///
/// `status` is `success` or `error`.
pub fn record_provider_call(operation: &str, status: &str, duration: Duration) {
    histogram!("rc_provider_call_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
    counter!("rc_provider_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Fan-out Metrics (Counters)
// ============================================================================

/// Record a push event delivered to a peer channel.
///
/// Metric: `rc_fanout_events_total`
/// Labels: `event` (new-producer, consumer-closed)
pub fn record_fanout_event(event: &str) {
    counter!("rc_fanout_events_total", "event" => event.to_string()).increment(1);
}

/// Record consumers closed because their producer's owner disconnected.
///
/// Metric: `rc_cascade_closes_total`
/// Labels: none
pub fn record_cascade_closes(count: u64) {
    counter!("rc_cascade_closes_total").increment(count);
}
