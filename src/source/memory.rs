// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process change table.
//!
//! Evaluates the same predicates as [`MySqlTable`](super::MySqlTable) over a
//! `BTreeMap` of rows. Used by tests and dry runs.

use super::{ChangeColumn, ChangeTable, LatestChange, SourceRow, TimestampWindow};
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Change table held in memory.
#[derive(Default)]
pub struct MemoryTable {
    rows: RwLock<BTreeMap<i64, SourceRow>>,
    item_queries: AtomicUsize,
    fail_queries: AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create pre-populated with `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = SourceRow>) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().map(|r| (r.id, r)).collect()),
            ..Default::default()
        }
    }

    /// Insert or replace a row.
    pub async fn put(&self, row: SourceRow) {
        self.rows.write().await.insert(row.id, row);
    }

    /// Set `updateAt` of an existing row. Returns false if the row is missing.
    pub async fn touch(&self, id: i64, update_at: DateTime<Utc>) -> bool {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.update_at = Some(update_at);
                true
            }
            None => false,
        }
    }

    /// Set `deleteAt` of an existing row. Returns false if the row is missing.
    pub async fn soft_delete(&self, id: i64, delete_at: DateTime<Utc>) -> bool {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.delete_at = Some(delete_at);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Number of item queries served (`rows_by_key` + `changes_in_window`).
    pub fn item_queries(&self) -> usize {
        self.item_queries.load(Ordering::SeqCst)
    }

    /// Make every subsequent query fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(SyncError::Source(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

impl ChangeTable for MemoryTable {
    fn max_key(&self) -> BoxFuture<'_, Option<i64>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.rows.read().await.keys().next_back().copied())
        })
    }

    fn rows_by_key(&self, after: i64, up_to: i64, limit: usize) -> BoxFuture<'_, Vec<SourceRow>> {
        Box::pin(async move {
            self.check_available()?;
            self.item_queries.fetch_add(1, Ordering::SeqCst);
            if after >= up_to {
                return Ok(Vec::new());
            }
            let rows = self.rows.read().await;
            Ok(rows
                .range(after + 1..=up_to)
                .take(limit)
                .map(|(_, row)| row.clone())
                .collect())
        })
    }

    fn latest_change(&self, column: ChangeColumn) -> BoxFuture<'_, Option<LatestChange>> {
        Box::pin(async move {
            self.check_available()?;
            let rows = self.rows.read().await;
            Ok(rows
                .values()
                .filter_map(|row| {
                    row.column_micros(column)
                        .map(|micros| LatestChange { micros, id: row.id })
                })
                .max_by_key(|c| (c.micros, c.id)))
        })
    }

    fn changes_in_window(
        &self,
        column: ChangeColumn,
        window: TimestampWindow,
        limit: usize,
    ) -> BoxFuture<'_, Vec<SourceRow>> {
        Box::pin(async move {
            self.check_available()?;
            self.item_queries.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.read().await;
            let mut hits: Vec<(i64, &SourceRow)> = rows
                .values()
                .filter_map(|row| {
                    row.column_micros(column)
                        .filter(|micros| window.contains(*micros, row.id))
                        .map(|micros| (micros, row))
                })
                .collect();
            hits.sort_by_key(|(micros, row)| (*micros, row.id));
            Ok(hits
                .into_iter()
                .take(limit)
                .map(|(_, row)| row.clone())
                .collect())
        })
    }

    fn table_name(&self) -> &str {
        "memory"
    }
}
