//! Metrics definitions for the rendezvous server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rendezvous_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: 4 values (server-init, client-init, server-answer, ice-candidate)
//! - `category`: 3 values (see `ErrorCategory`)
//! - `actor_type`: 2 values (registry, connection)
//! - `reason`: bounded by `CloseReason` (4 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Session lifetime buckets - bounded by the negotiation deadline
        .set_buckets_for_metric(
            Matcher::Full("rendezvous_session_duration_seconds".to_string()),
            &[0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 120.0],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `rendezvous_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rendezvous_connections_active").set(count as f64);
}

/// Metric: `rendezvous_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rendezvous_rooms_active").set(count as f64);
}

/// Metric: `rendezvous_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rendezvous_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `rendezvous_rooms_created_total`
pub fn record_room_created() {
    counter!("rendezvous_rooms_created_total").increment(1);
}

/// A second member joined a room.
///
/// Metric: `rendezvous_pairings_total`
pub fn record_pairing() {
    counter!("rendezvous_pairings_total").increment(1);
}

/// A payload was relayed to a room.
///
/// Metric: `rendezvous_relays_total`
/// Labels: `event`
pub fn record_relay(event: &'static str) {
    counter!("rendezvous_relays_total", "event" => event).increment(1);
}

/// A `custom-error` was sent to a connection.
///
/// Metric: `rendezvous_signaling_errors_total`
/// Labels: `category`
pub fn record_signaling_error(category: &'static str) {
    counter!("rendezvous_signaling_errors_total", "category" => category).increment(1);
}

/// Metric: `rendezvous_session_timeouts_total`
pub fn record_session_timeout() {
    counter!("rendezvous_session_timeouts_total").increment(1);
}

/// A connection was closed by the service because its peer left.
///
/// Metric: `rendezvous_forced_closes_total`
pub fn record_forced_close() {
    counter!("rendezvous_forced_closes_total").increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Time from connect to close.
///
/// Metric: `rendezvous_session_duration_seconds`
/// Labels: `reason`
pub fn record_session_duration(reason: &'static str, duration: Duration) {
    histogram!("rendezvous_session_duration_seconds", "reason" => reason)
        .record(duration.as_secs_f64());
}
