//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Source query latency
//! - Bulk write outcomes and latency
//! - Chunk throughput (executed/skipped, upserts/deletes)
//! - Cursor position and persistence
//! - Delete cleanup requests
//! - Iteration outcomes and failures
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `index_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use index_sync_engine::metrics;
//! use std::time::Duration;
//!
//! // After a bulk request returned
//! metrics::record_bulk("all_accepted", 1000, Duration::from_millis(80));
//!
//! // After the engine advanced its cursor
//! metrics::set_cursor_position("timestamp-agent", 1_700_000_000.25);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

// =============================================================================
// Source Metrics
// =============================================================================

/// Record one query against the change table.
pub fn record_source_query(query: &str, duration: Duration) {
    counter!("index_sync_source_queries_total", "query" => query.to_string()).increment(1);
    histogram!("index_sync_source_query_duration_seconds", "query" => query.to_string())
        .record(duration.as_secs_f64());
}

/// Record an update/delete-by-query issued for deleted rows.
pub fn record_delete_cleanup(kind: &str, success: bool) {
    counter!(
        "index_sync_delete_cleanup_total",
        "kind" => kind.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

// =============================================================================
// Bulk Write Metrics
// =============================================================================

/// Record a bulk request with its classified outcome.
pub fn record_bulk(outcome: &str, actions: usize, duration: Duration) {
    counter!("index_sync_bulk_requests_total", "outcome" => outcome.to_string()).increment(1);
    counter!("index_sync_bulk_actions_total", "outcome" => outcome.to_string())
        .increment(actions as u64);
    histogram!("index_sync_bulk_duration_seconds").record(duration.as_secs_f64());
    histogram!("index_sync_bulk_size").record(actions as f64);
}

// =============================================================================
// Chunk Metrics
// =============================================================================

/// Record a written chunk.
pub fn record_chunk_executed(stream_id: &str, upserts: usize, deletes: usize) {
    let stream = stream_id.to_string();

    counter!("index_sync_chunks_executed_total", "stream_id" => stream.clone()).increment(1);
    counter!("index_sync_documents_upserted_total", "stream_id" => stream.clone())
        .increment(upserts as u64);
    if deletes > 0 {
        counter!("index_sync_documents_deleted_total", "stream_id" => stream)
            .increment(deletes as u64);
    }
}

/// Record a chunk that wrote nothing.
pub fn record_chunk_skipped(stream_id: &str, reason: &str) {
    counter!(
        "index_sync_chunks_skipped_total",
        "stream_id" => stream_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// =============================================================================
// Cursor Metrics
// =============================================================================

/// Set the approximate cursor position of a stream.
pub fn set_cursor_position(stream_id: &str, position: f64) {
    gauge!("index_sync_cursor_position", "stream_id" => stream_id.to_string()).set(position);
}

/// Record a cursor write and whether the backend acknowledged it.
pub fn record_cursor_persist(stream_id: &str, acknowledged: bool) {
    counter!(
        "index_sync_cursor_persists_total",
        "stream_id" => stream_id.to_string(),
        "status" => status(acknowledged)
    )
    .increment(1);
}

/// Record cursor SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn cursor_retries_total(operation: &str) {
    counter!("index_sync_cursor_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Engine Metrics
// =============================================================================

/// Record one loop iteration.
pub fn record_iteration(stream_id: &str, outcome: &str, duration: Duration) {
    counter!(
        "index_sync_iterations_total",
        "stream_id" => stream_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("index_sync_iteration_duration_seconds", "stream_id" => stream_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record a failed iteration.
pub fn record_uncaught_error(stream_id: &str, retryable: bool) {
    counter!(
        "index_sync_errors_total",
        "stream_id" => stream_id.to_string(),
        "retryable" => if retryable { "true" } else { "false" }
    )
    .increment(1);
}
