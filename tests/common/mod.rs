//! Shared test utilities for scenario and integration tests.
//!
//! This module provides:
//! - MySQL and Redis testcontainer setup
//! - In-memory engine harnesses for both strategies
//! - Row helpers

#![allow(dead_code)]

pub mod containers;

pub use containers::*;

use chrono::{DateTime, Utc};
use index_sync_engine::cursor::MemoryCursorStore;
use index_sync_engine::search::MemoryIndex;
use index_sync_engine::source::{micros_to_datetime, DocumentTarget, MemoryTable, SourceRow};
use index_sync_engine::{
    BulkWriter, EventSender, KeyCursor, KeyReader, SyncEngine, SyncEvent, TimestampCursor,
    TimestampReader,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const INDEX: &str = "test";
pub const PREFIX: &str = "id_";

/// Whole seconds since the epoch as a row timestamp.
pub fn at(secs: i64) -> DateTime<Utc> {
    micros_to_datetime(secs * 1_000_000).unwrap()
}

/// Document id of a row.
pub fn doc_id(row_id: i64) -> String {
    format!("{}{}", PREFIX, row_id)
}

/// An engine wired to in-memory collaborators, plus handles on all of them.
pub struct Harness<R: index_sync_engine::SourceReader> {
    pub engine: SyncEngine<R>,
    pub table: Arc<MemoryTable>,
    pub index: Arc<MemoryIndex>,
    pub store: Arc<MemoryCursorStore>,
    pub events: mpsc::UnboundedReceiver<SyncEvent<R::Cursor>>,
}

impl<R: index_sync_engine::SourceReader> Harness<R> {
    /// Names of all events published so far.
    pub fn drain_event_names(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name());
        }
        names
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent<R::Cursor>> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn parts(
    table: MemoryTable,
    index: MemoryIndex,
    store: MemoryCursorStore,
) -> (Arc<MemoryTable>, Arc<MemoryIndex>, Arc<MemoryCursorStore>) {
    (Arc::new(table), Arc::new(index), Arc::new(store))
}

/// Timestamp-strategy engine over `table`.
pub fn timestamp_harness(
    table: MemoryTable,
    index: MemoryIndex,
    store: MemoryCursorStore,
    chunk_limit: usize,
) -> Harness<TimestampReader> {
    let (table, index, store) = parts(table, index, store);
    let (events, rx) = EventSender::<TimestampCursor>::channel();
    let reader = TimestampReader::new(table.clone(), DocumentTarget::new(INDEX, PREFIX), chunk_limit);
    let engine = SyncEngine::new(
        "timestamp-agent",
        Duration::from_millis(1),
        reader,
        BulkWriter::new(index.clone()),
        store.clone(),
        events,
    );
    Harness {
        engine,
        table,
        index,
        store,
        events: rx,
    }
}

/// Key-strategy engine over `table`.
pub fn key_harness(
    table: MemoryTable,
    index: MemoryIndex,
    store: MemoryCursorStore,
    chunk_limit: usize,
) -> Harness<KeyReader> {
    let (table, index, store) = parts(table, index, store);
    let (events, rx) = EventSender::<KeyCursor>::channel();
    let reader = KeyReader::new(table.clone(), DocumentTarget::new(INDEX, PREFIX), chunk_limit);
    let engine = SyncEngine::new(
        "key-agent",
        Duration::from_millis(1),
        reader,
        BulkWriter::new(index.clone()),
        store.clone(),
        events,
    );
    Harness {
        engine,
        table,
        index,
        store,
        events: rx,
    }
}

/// Rows `1..=n`, row `i` created at second `i`.
pub fn sequential_rows(n: i64) -> MemoryTable {
    MemoryTable::with_rows((1..=n).map(|id| SourceRow::created(id, at(id))))
}
