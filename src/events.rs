// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle events of the sync loop.
//!
//! The engine never logs lifecycle facts itself. It pushes a typed
//! [`SyncEvent`] into an unbounded channel; publishing never blocks and never
//! fails the iteration, even if nobody is listening.
//!
//! [`EventLogger`] is the bundled consumer: it drains the channel into
//! `tracing` records and metrics.
//!
//! ```rust,no_run
//! use index_sync_engine::cursor::TimestampCursor;
//! use index_sync_engine::events::{EventLogger, EventSender};
//!
//! # async fn demo() {
//! let (events, rx) = EventSender::<TimestampCursor>::channel();
//! let logger = EventLogger::new("timestamp-agent").spawn(rx);
//! // hand `events` to the engine ...
//! drop(events);
//! logger.await.ok();
//! # }
//! ```

use crate::bulk::item_failures;
use crate::cursor::Cursor;
use crate::document::ChunkResult;
use crate::metrics;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Why an iteration wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source's latest position equals the in-memory cursor.
    CursorNotChanged,
    /// The window between cursor and latest position held no rows.
    NotFoundItems,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CursorNotChanged => "cursor is not changed",
            Self::NotFoundItems => "not found items",
        }
    }

    /// Label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::CursorNotChanged => "cursor_not_changed",
            Self::NotFoundItems => "not_found_items",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observable fact about the sync loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<C> {
    /// Emitted once, after the cursor was bootstrapped from the store.
    Startup { stream_id: String, cursor: C },
    /// A chunk was written and the cursor advanced.
    ExecutedChunk(ChunkResult<C>),
    SkippedChunk(SkipReason),
    /// Raw response of a batch with hard failures; cursor did not move.
    BulkError(Value),
    /// Raw response of a batch whose failures were all ignorable.
    BulkErrorIgnored(Value),
    /// An iteration failed; `cursor` is the in-memory cursor before it.
    UncaughtError {
        error: String,
        retryable: bool,
        cursor: C,
    },
}

impl<C> SyncEvent<C> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::ExecutedChunk(_) => "executedChunk",
            Self::SkippedChunk(_) => "skippedChunk",
            Self::BulkError(_) => "bulkError",
            Self::BulkErrorIgnored(_) => "bulkErrorIgnored",
            Self::UncaughtError { .. } => "uncaughtError",
        }
    }
}

/// Publishing half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender<C> {
    tx: Option<mpsc::UnboundedSender<SyncEvent<C>>>,
}

impl<C> EventSender<C> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent<C>) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event) {
                trace!(event = e.0.name(), "Event dropped, no subscriber");
            }
        }
    }
}

/// Turns events into log records and metrics.
#[derive(Debug, Clone)]
pub struct EventLogger {
    stream_id: String,
}

impl EventLogger {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    /// Drain `rx` until every sender is dropped.
    pub async fn run<C: Cursor>(self, mut rx: mpsc::UnboundedReceiver<SyncEvent<C>>) {
        while let Some(event) = rx.recv().await {
            self.log(&event);
        }
        debug!(stream_id = %self.stream_id, "Event channel closed");
    }

    /// Run on a background task.
    pub fn spawn<C: Cursor>(self, rx: mpsc::UnboundedReceiver<SyncEvent<C>>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    pub fn log<C: Cursor>(&self, event: &SyncEvent<C>) {
        let stream_id = self.stream_id.as_str();
        match event {
            SyncEvent::Startup { stream_id: id, cursor } => {
                info!(stream_id = %id, cursor = ?cursor, "Sync engine started");
                metrics::set_cursor_position(id, cursor.position_hint());
            }
            SyncEvent::ExecutedChunk(chunk) => {
                info!(
                    stream_id = %stream_id,
                    items = chunk.items.len(),
                    upserts = chunk.upserts(),
                    deletes = chunk.deletes(),
                    current = ?chunk.current,
                    latest = ?chunk.latest,
                    latest_from_items = ?chunk.latest_from_items,
                    "Executed chunk"
                );
                metrics::record_chunk_executed(stream_id, chunk.upserts(), chunk.deletes());
                metrics::set_cursor_position(stream_id, chunk.latest_from_items.position_hint());
            }
            SyncEvent::SkippedChunk(reason) => {
                debug!(stream_id = %stream_id, reason = %reason, "Skipped chunk");
                metrics::record_chunk_skipped(stream_id, reason.label());
            }
            SyncEvent::BulkError(response) => {
                error!(
                    stream_id = %stream_id,
                    failures = %summarize(response),
                    "Bulk write failed, cursor not advanced"
                );
            }
            SyncEvent::BulkErrorIgnored(response) => {
                warn!(
                    stream_id = %stream_id,
                    failures = %summarize(response),
                    "Bulk write had ignorable failures"
                );
            }
            SyncEvent::UncaughtError {
                error,
                retryable,
                cursor,
            } => {
                error!(
                    stream_id = %stream_id,
                    error = %error,
                    retryable,
                    cursor = ?cursor,
                    "Iteration failed, retrying after delay"
                );
                metrics::record_uncaught_error(stream_id, *retryable);
            }
        }
    }
}

/// Compact `type=count` summary of the failed items in a bulk response.
fn summarize(response: &Value) -> String {
    let failures = match item_failures(response) {
        Some(f) if !f.is_empty() => f,
        _ => return "no item details".to_string(),
    };

    let mut counts: Vec<(String, usize)> = Vec::new();
    for failure in failures {
        match counts.iter_mut().find(|(t, _)| *t == failure.error_type) {
            Some((_, n)) => *n += 1,
            None => counts.push((failure.error_type, 1)),
        }
    }
    counts
        .iter()
        .map(|(t, n)| format!("{}={}", t, n))
        .collect::<Vec<_>>()
        .join(", ")
}
