// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Index Sync Engine
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker / OrbStack)
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration mysql_table -- --ignored
//! ```
//!
//! # Test Organization
//! - `redis_cursor_*` - cache-backed cursor persistence
//! - `sql_cursor_*` - row-backed cursor persistence on MySQL
//! - `mysql_table_*` - change table queries
//! - `engine_*` - the loop against real MySQL and Redis

mod common;

use common::*;
use index_sync_engine::cursor::{load_cursor, persist_cursor, RedisCursorStore, SqlCursorStore};
use index_sync_engine::search::MemoryIndex;
use index_sync_engine::source::{ChangeColumn, ChangeTable, DocumentTarget, MySqlTable, TimestampWindow};
use index_sync_engine::{
    BulkWriter, CursorStore, EventSender, IterationOutcome, KeyCursor, SkipReason, SourceReader,
    SyncEngine, TimestampCursor, TimestampReader,
};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::clients::Cli;

const TABLE: &str = "dummy";

// =============================================================================
// Redis Cursor Store Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cursor_missing_entry_is_none() {
    let docker = Cli::default();
    let container = redis_container(&docker);
    let store = RedisCursorStore::connect(&redis_url(&container)).await.unwrap();

    assert_eq!(store.get("never-written").await.unwrap(), None);
    let cursor: TimestampCursor = load_cursor(&store, "never-written").await.unwrap();
    assert_eq!(cursor, TimestampCursor::default());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cursor_roundtrip_and_overwrite() {
    let docker = Cli::default();
    let container = redis_container(&docker);
    let store = RedisCursorStore::connect(&redis_url(&container)).await.unwrap();

    let first = TimestampCursor::from_micros(1_700_000_000_000_001, 3);
    let second = TimestampCursor::from_micros(1_700_000_000_500_000, 9);
    assert!(persist_cursor(&store, "timestamp-agent", &first).await.unwrap());
    assert!(persist_cursor(&store, "timestamp-agent", &second).await.unwrap());

    let loaded: TimestampCursor = load_cursor(&store, "timestamp-agent").await.unwrap();
    assert_eq!(loaded, second);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cursor_survives_reconnect() {
    let docker = Cli::default();
    let container = redis_container(&docker);
    let url = redis_url(&container);

    {
        let store = RedisCursorStore::connect(&url).await.unwrap();
        persist_cursor(&store, "key-agent", &KeyCursor::new(77)).await.unwrap();
    }

    let store = RedisCursorStore::connect(&url).await.unwrap();
    let loaded: KeyCursor = load_cursor(&store, "key-agent").await.unwrap();
    assert_eq!(loaded.id, 77);
    let other: KeyCursor = load_cursor(&store, "other-agent").await.unwrap();
    assert_eq!(other.id, 0);
}

// =============================================================================
// SQL Cursor Store Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn sql_cursor_on_mysql_upserts_one_row_per_stream() {
    let docker = Cli::default();
    let container = mysql_container(&docker);
    let url = mysql_url(&container);
    let pool = connect_mysql(&url).await;

    let store = SqlCursorStore::connect(&url).await.unwrap();
    assert!(persist_cursor(&store, "a", &KeyCursor::new(1)).await.unwrap());
    assert!(persist_cursor(&store, "a", &KeyCursor::new(2)).await.unwrap());
    // Same value again: MySQL reports zero affected rows, still acknowledged.
    assert!(persist_cursor(&store, "a", &KeyCursor::new(2)).await.unwrap());
    assert!(persist_cursor(&store, "b", &KeyCursor::new(5)).await.unwrap());

    let a: KeyCursor = load_cursor(&store, "a").await.unwrap();
    assert_eq!(a.id, 2);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);
    store.close().await;
}

// =============================================================================
// MySQL Change Table Tests
// =============================================================================

async fn seeded_table(url: &str) -> MySqlTable {
    let pool = connect_mysql(url).await;
    create_change_table(&pool, TABLE).await;
    for id in 1..=10 {
        let update = if id == 7 { Some(at(50)) } else { None };
        insert_row(&pool, TABLE, id, &format!("row {}", id), at(id), update, None).await;
    }
    MySqlTable::from_pool(pool, TABLE).unwrap()
}

#[tokio::test]
#[ignore] // Requires Docker
async fn mysql_table_key_queries() {
    let docker = Cli::default();
    let container = mysql_container(&docker);
    let table = seeded_table(&mysql_url(&container)).await;

    assert_eq!(table.max_key().await.unwrap(), Some(10));

    let rows = table.rows_by_key(3, 10, 4).await.unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![4, 5, 6, 7]);
    assert_eq!(rows[0].data.as_deref(), Some("row 4"));
    assert_eq!(rows[3].update_at, Some(at(50)));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn mysql_table_latest_change_per_column() {
    let docker = Cli::default();
    let container = mysql_container(&docker);
    let table = seeded_table(&mysql_url(&container)).await;

    let created = table.latest_change(ChangeColumn::CreateAt).await.unwrap().unwrap();
    assert_eq!((created.micros, created.id), (10_000_000, 10));

    let updated = table.latest_change(ChangeColumn::UpdateAt).await.unwrap().unwrap();
    assert_eq!((updated.micros, updated.id), (50_000_000, 7));

    assert!(table.latest_change(ChangeColumn::DeleteAt).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn mysql_table_window_tie_break_at_microsecond_precision() {
    let docker = Cli::default();
    let container = mysql_container(&docker);
    let url = mysql_url(&container);
    let pool = connect_mysql(&url).await;
    create_change_table(&pool, TABLE).await;

    let tie = index_sync_engine::source::micros_to_datetime(100_000_123).unwrap();
    insert_row(&pool, TABLE, 5, "five", tie, None, None).await;
    insert_row(&pool, TABLE, 7, "seven", tie, None, None).await;
    let table = MySqlTable::from_pool(pool, TABLE).unwrap();

    let start = TimestampCursor::from_micros(100_000_123, 5);
    let end = TimestampCursor::from_micros(100_000_123, 7);
    let rows = table
        .changes_in_window(ChangeColumn::CreateAt, TimestampWindow::new(&start, &end), 10)
        .await
        .unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![7]);
}

// =============================================================================
// Engine Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn engine_timestamp_strategy_against_mysql_and_redis() {
    let docker = Cli::default();
    let mysql = mysql_container(&docker);
    let redis = redis_container(&docker);

    let table = Arc::new(seeded_table(&mysql_url(&mysql)).await);
    let store = Arc::new(RedisCursorStore::connect(&redis_url(&redis)).await.unwrap());
    let index = Arc::new(MemoryIndex::new());

    let reader = TimestampReader::new(table.clone(), DocumentTarget::new(INDEX, PREFIX), 1000);
    assert_eq!(reader.latest().await.unwrap(), TimestampCursor::from_micros(50_000_000, 7));

    let mut engine = SyncEngine::new(
        "timestamp-agent",
        Duration::from_millis(1),
        reader,
        BulkWriter::new(index.clone()),
        store.clone(),
        EventSender::disabled(),
    );

    let report = engine.run_once().await;
    assert!(report.outcome.advanced(), "{:?}", report.outcome);
    assert_eq!(report.items, 10);
    assert_eq!(index.get(INDEX, "id_7").await.unwrap().version, 50_000_000);

    let stored: TimestampCursor = load_cursor(store.as_ref(), "timestamp-agent").await.unwrap();
    assert_eq!(stored, TimestampCursor::from_micros(50_000_000, 7));

    let report = engine.run_once().await;
    assert_eq!(report.outcome, IterationOutcome::Skipped(SkipReason::CursorNotChanged));
}
