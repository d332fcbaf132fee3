// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync loop.
//!
//! One engine owns one stream and one piece of state: the in-memory cursor.
//!
//! ```text
//! bootstrap: cursor ← CursorStore (zero if absent)
//! loop:
//!   latest ← reader.latest()
//!   latest == cursor?          → SkippedChunk("cursor is not changed")
//!   items ← reader.items(cursor, latest)
//!   items empty?               → SkippedChunk("not found items")
//!   target ← reader.cursor_from_items(items)
//!   outcome ← BulkWriter.write(items)
//!   Failed                     → BulkError, cursor stays
//!   AllAccepted | Ignorable    → cursor ← target, persist, ExecutedChunk
//!   any error                  → UncaughtError(pre-iteration cursor)
//!   sleep(chunk_delay)
//! ```
//!
//! Cursors are compared only through their serialized form; ordering stays
//! inside the strategy's queries. The advance target comes from the returned
//! items rather than from `latest`, so a truncated chunk never skips rows.
//!
//! # Error Policy
//!
//! No error stops the loop. A failing iteration is reported and the same
//! window is retried after the regular delay, forever.
//!
//! # Graceful Shutdown
//!
//! [`SyncEngine::run`] watches a `watch::Receiver<bool>`. When it turns
//! `true` the loop stops at the next await point (an in-flight step is
//! dropped) and `run` returns `Ok(())`. Dropping the sender does not stop the
//! engine.

use crate::bulk::{BulkOutcome, BulkWriter};
use crate::config::{DeleteCleanup, Strategy, SyncConfig};
use crate::cursor::{load_cursor, open_cursor_store, Cursor, CursorStore};
use crate::document::ChunkResult;
use crate::error::{Result, SyncError};
use crate::events::{EventSender, SkipReason, SyncEvent};
use crate::metrics;
use crate::search::{HttpSearchClient, SearchClient};
use crate::source::{DocumentTarget, KeyReader, MySqlTable, SourceReader, TimestampReader};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// Items were written and the cursor advanced.
    Executed(BulkOutcome),
    Skipped(SkipReason),
    /// The batch had hard failures; the cursor did not move.
    BulkFailed,
    /// The iteration aborted with an error.
    Errored { error: String, retryable: bool },
}

impl IterationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed(_) => "executed",
            Self::Skipped(_) => "skipped",
            Self::BulkFailed => "bulk_failed",
            Self::Errored { .. } => "errored",
        }
    }

    /// Whether the in-memory cursor moved.
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

/// Result of [`SyncEngine::run_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport<C> {
    pub outcome: IterationOutcome,
    pub cursor_before: C,
    pub cursor_after: C,
    pub items: usize,
}

/// Drives one replication stream.
pub struct SyncEngine<R: SourceReader> {
    reader: R,
    writer: BulkWriter,
    store: Arc<dyn CursorStore>,
    events: EventSender<R::Cursor>,
    stream_id: String,
    chunk_delay: Duration,
    cursor: R::Cursor,
    bootstrapped: bool,
}

impl<R: SourceReader> SyncEngine<R> {
    pub fn new(
        stream_id: impl Into<String>,
        chunk_delay: Duration,
        reader: R,
        writer: BulkWriter,
        store: Arc<dyn CursorStore>,
        events: EventSender<R::Cursor>,
    ) -> Self {
        Self {
            reader,
            writer,
            store,
            events,
            stream_id: stream_id.into(),
            chunk_delay,
            cursor: R::Cursor::default(),
            bootstrapped: false,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The in-memory cursor.
    pub fn cursor(&self) -> &R::Cursor {
        &self.cursor
    }

    /// Load the cursor from the store into memory. No write-back.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let cursor: R::Cursor = load_cursor(self.store.as_ref(), &self.stream_id).await?;
        self.cursor = cursor;
        self.bootstrapped = true;

        info!(
            stream_id = %self.stream_id,
            strategy = self.reader.name(),
            backend = self.store.name(),
            "Cursor bootstrapped"
        );
        self.events.emit(SyncEvent::Startup {
            stream_id: self.stream_id.clone(),
            cursor: self.cursor.clone(),
        });
        Ok(())
    }

    /// Loop until `shutdown` turns `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            stream_id = %self.stream_id,
            strategy = self.reader.name(),
            chunk_delay_ms = self.chunk_delay.as_millis() as u64,
            "Starting sync engine"
        );

        while !self.bootstrapped {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return self.stopped(),
                result = self.bootstrap() => {
                    if let Err(e) = result {
                        self.report_error(&e, self.cursor.clone());
                    }
                }
            }
            if !self.bootstrapped && self.pause(&mut shutdown).await {
                return self.stopped();
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = self.run_once() => {}
            }
            if self.pause(&mut shutdown).await {
                break;
            }
        }

        self.stopped()
    }

    fn stopped(&self) -> Result<()> {
        info!(stream_id = %self.stream_id, cursor = ?self.cursor, "Sync engine stopped");
        Ok(())
    }

    /// Sleep for the chunk delay. Returns true if shutdown was requested.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => true,
            _ = tokio::time::sleep(self.chunk_delay) => false,
        }
    }

    /// Execute exactly one iteration (no delay). Errors are reported as an
    /// `UncaughtError` event and in the returned report, never returned.
    pub async fn run_once(&mut self) -> IterationReport<R::Cursor> {
        let cursor_before = self.cursor.clone();
        let started = Instant::now();

        let result = if self.bootstrapped {
            self.execute_chunk().await
        } else {
            match self.bootstrap().await {
                Ok(()) => self.execute_chunk().await,
                Err(e) => Err(e),
            }
        };

        let (outcome, items) = match result {
            Ok(done) => done,
            Err(e) => {
                self.report_error(&e, cursor_before.clone());
                (
                    IterationOutcome::Errored {
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    },
                    0,
                )
            }
        };

        metrics::record_iteration(&self.stream_id, outcome.label(), started.elapsed());

        IterationReport {
            outcome,
            cursor_before,
            cursor_after: self.cursor.clone(),
            items,
        }
    }

    fn report_error(&self, error: &SyncError, cursor: R::Cursor) {
        warn!(stream_id = %self.stream_id, error = %error, "Iteration failed");
        self.events.emit(SyncEvent::UncaughtError {
            error: error.to_string(),
            retryable: error.is_retryable(),
            cursor,
        });
    }

    #[instrument(skip(self), fields(stream_id = %self.stream_id, strategy = self.reader.name()))]
    async fn execute_chunk(&mut self) -> Result<(IterationOutcome, usize)> {
        let current = self.cursor.clone();

        let latest = self.reader.latest().await?;
        if latest.fingerprint()? == current.fingerprint()? {
            self.events.emit(SyncEvent::SkippedChunk(SkipReason::CursorNotChanged));
            return Ok((IterationOutcome::Skipped(SkipReason::CursorNotChanged), 0));
        }

        let items = self.reader.items(&current, &latest).await?;
        if items.is_empty() {
            self.events.emit(SyncEvent::SkippedChunk(SkipReason::NotFoundItems));
            return Ok((IterationOutcome::Skipped(SkipReason::NotFoundItems), 0));
        }

        let latest_from_items = self
            .reader
            .cursor_from_items(&items)
            .ok_or_else(|| SyncError::Internal("no cursor derivable from a non-empty chunk".into()))?;

        debug!(items = items.len(), latest = ?latest, target = ?latest_from_items, "Writing chunk");

        self.reader.before_write(&items).await?;
        let report = self.writer.write(&items).await?;
        let count = items.len();

        match report.outcome {
            BulkOutcome::Failed => {
                self.events.emit(SyncEvent::BulkError(report.response));
                return Ok((IterationOutcome::BulkFailed, count));
            }
            BulkOutcome::PartiallyIgnorable => {
                self.events.emit(SyncEvent::BulkErrorIgnored(report.response));
            }
            BulkOutcome::AllAccepted => {}
        }

        self.set_cursor(latest_from_items.clone(), true).await?;

        self.events.emit(SyncEvent::ExecutedChunk(ChunkResult {
            current,
            latest,
            latest_from_items,
            items,
        }));

        Ok((IterationOutcome::Executed(report.outcome), count))
    }

    /// Move the in-memory cursor, optionally persisting it.
    ///
    /// A cursor equal to the current one is neither applied nor written.
    /// Returns whether anything changed.
    pub async fn set_cursor(&mut self, cursor: R::Cursor, persist: bool) -> Result<bool> {
        let json = cursor.fingerprint()?;
        if json == self.cursor.fingerprint()? {
            return Ok(false);
        }

        self.cursor = cursor;

        if persist {
            let acknowledged = self.store.set(&self.stream_id, &json).await?;
            metrics::record_cursor_persist(&self.stream_id, acknowledged);
            if !acknowledged {
                warn!(
                    stream_id = %self.stream_id,
                    backend = self.store.name(),
                    cursor = %json,
                    "Cursor store did not acknowledge write"
                );
            }
        }
        Ok(true)
    }
}

/// Resolve once the flag is `true`. Pends forever if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Wiring from configuration
// =============================================================================

async fn connect_parts(
    config: &SyncConfig,
    expected: Strategy,
) -> Result<(Arc<MySqlTable>, Arc<HttpSearchClient>, Arc<dyn CursorStore>, DocumentTarget)> {
    config.validate()?;
    if config.source.strategy != expected {
        return Err(SyncError::Config(format!(
            "source.strategy is {:?}, expected {:?}",
            config.source.strategy, expected
        )));
    }

    let table = Arc::new(MySqlTable::connect(&config.source).await?);
    let search = Arc::new(HttpSearchClient::new(config.search.clone())?);
    let store = open_cursor_store(&config.cursor).await?;
    let target = DocumentTarget::new(config.stream.index.clone(), config.stream.id_prefix.clone());
    Ok((table, search, store, target))
}

/// Build a timestamp-strategy engine against MySQL, the HTTP index and the
/// configured cursor store.
pub async fn timestamp_engine(
    config: &SyncConfig,
    events: EventSender<crate::cursor::TimestampCursor>,
) -> Result<SyncEngine<TimestampReader>> {
    let (table, search, store, target) = connect_parts(config, Strategy::Timestamp).await?;

    let mut reader = TimestampReader::new(table, target, config.stream.chunk_limit);
    if config.source.delete_cleanup != DeleteCleanup::None {
        let cleanup_client: Arc<dyn SearchClient> = search.clone();
        reader = reader.with_delete_cleanup(
            config.source.delete_cleanup,
            config.source.deleted_tag.clone(),
            cleanup_client,
        );
    }

    Ok(SyncEngine::new(
        config.stream.stream_id.clone(),
        config.stream.chunk_delay_duration(),
        reader,
        BulkWriter::new(search),
        store,
        events,
    ))
}

/// Build a key-strategy engine against MySQL, the HTTP index and the
/// configured cursor store.
pub async fn key_engine(
    config: &SyncConfig,
    events: EventSender<crate::cursor::KeyCursor>,
) -> Result<SyncEngine<KeyReader>> {
    let (table, search, store, target) = connect_parts(config, Strategy::Key).await?;
    let reader = KeyReader::new(table, target, config.stream.chunk_limit);

    Ok(SyncEngine::new(
        config.stream.stream_id.clone(),
        config.stream.chunk_delay_duration(),
        reader,
        BulkWriter::new(search),
        store,
        events,
    ))
}
