// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emits through the `metrics` facade; the embedding process decides which
//! recorder (Prometheus, statsd, none) receives them.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `indexer_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an event that reached the index (replace or delete).
pub fn record_event_applied(namespace: &str, op: &str) {
    counter!("indexer_events_applied_total", "namespace" => namespace.to_string(), "op" => op.to_string()).increment(1);
}

/// Record an upsert skipped because the document no longer exists.
pub fn record_event_skipped(namespace: &str, reason: &str) {
    counter!("indexer_events_skipped_total", "namespace" => namespace.to_string(), "reason" => reason.to_string()).increment(1);
}

/// Record a failed apply.
pub fn record_apply_failure(namespace: &str, op: &str) {
    counter!("indexer_apply_failures_total", "namespace" => namespace.to_string(), "op" => op.to_string()).increment(1);
}

/// Record apply latency (resolve + index write).
pub fn record_apply_latency(duration: Duration) {
    histogram!("indexer_apply_duration_seconds").record(duration.as_secs_f64());
}

/// Record a poll outcome (`event`, `idle`, `disconnected`).
pub fn record_poll(outcome: &str) {
    counter!("indexer_polls_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record stream read (XREAD) latency.
pub fn record_poll_latency(duration: Duration) {
    histogram!("indexer_poll_duration_seconds").record(duration.as_secs_f64());
}

/// Record a log record that could not be decoded and was skipped.
pub fn record_parse_error() {
    counter!("indexer_parse_errors_total").increment(1);
}

/// Record a (re)connect attempt against the log.
pub fn record_connect(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("indexer_source_connects_total", "status" => status).increment(1);
}

/// Record entering recovery, by reason (`disconnected`, `apply_failed`, ...).
pub fn record_recovery(reason: &str) {
    counter!("indexer_recoveries_total", "reason" => reason.to_string()).increment(1);
}

/// Record checkpoint persistence.
pub fn record_checkpoint_save(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("indexer_checkpoint_saves_total", "status" => status).increment(1);
}

/// Record checkpoint SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_checkpoint_retry(operation: &str) {
    counter!("indexer_checkpoint_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record replication lag in milliseconds (event time vs wall clock).
pub fn record_lag_ms(lag_ms: u64) {
    gauge!("indexer_lag_ms").set(lag_ms as f64);
}

/// Record that the log was trimmed past our checkpoint (data gap possible).
pub fn record_stream_trimmed() {
    counter!("indexer_stream_trimmed_total").increment(1);
}

/// Gauge for replicator state.
pub fn set_replicator_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Connecting" => 0.0,
        "Streaming" => 1.0,
        "Applying" => 2.0,
        "Recovering" => 3.0,
        "Stopped" => 4.0,
        _ => -1.0,
    };
    gauge!("indexer_replicator_state").set(value);
}
