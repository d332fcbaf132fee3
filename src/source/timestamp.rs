// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Timestamp strategy with tie-break ids.
//!
//! Any of `createAt`, `updateAt`, `deleteAt` can move a row forward, so each
//! column is queried independently with the window predicate
//!
//! ```text
//! (col = start.timestamp AND id > start.id) OR (start.timestamp < col <= end.timestamp)
//! ```
//!
//! and the hits are merged by `(timestamp, id)` and truncated to the chunk
//! limit. A row sitting exactly on the cursor's timestamp is re-read only if
//! its id is above the cursor's id, so nothing sharing the boundary
//! timestamp is skipped or emitted twice.
//!
//! # Row collapse
//!
//! A row with several of its timestamps inside one chunk is emitted once, at
//! its last position in merge order. The last hit of the chunk always survives,
//! so the cursor derived from the items is unaffected.
//!
//! # Delete cleanup
//!
//! With [`DeleteCleanup`] enabled, the ids of Delete documents are tagged
//! and/or removed through update/delete-by-query before the batch is written.
//! Failures are logged and never fail the batch.

use super::{ChangeColumn, ChangeTable, DocumentTarget, SourceReader, SourceRow, TimestampWindow};
use crate::config::DeleteCleanup;
use crate::cursor::TimestampCursor;
use crate::document::Document;
use crate::error::Result;
use crate::metrics;
use crate::search::SearchClient;
use crate::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field written by the tagging cleanup.
pub const TAG_FIELD: &str = "tag";

/// Timestamp-based [`SourceReader`].
pub struct TimestampReader {
    table: Arc<dyn ChangeTable>,
    target: DocumentTarget,
    chunk_limit: usize,
    cleanup: DeleteCleanup,
    deleted_tag: String,
    search: Option<Arc<dyn SearchClient>>,
}

impl TimestampReader {
    pub fn new(table: Arc<dyn ChangeTable>, target: DocumentTarget, chunk_limit: usize) -> Self {
        Self {
            table,
            target,
            chunk_limit,
            cleanup: DeleteCleanup::None,
            deleted_tag: "DELETED".to_string(),
            search: None,
        }
    }

    /// Enable the by-query cleanup for deleted rows.
    pub fn with_delete_cleanup(
        mut self,
        cleanup: DeleteCleanup,
        deleted_tag: impl Into<String>,
        search: Arc<dyn SearchClient>,
    ) -> Self {
        self.cleanup = cleanup;
        self.deleted_tag = deleted_tag.into();
        self.search = Some(search);
        self
    }

    async fn fetch_latest(&self) -> Result<TimestampCursor> {
        let mut latest = None;
        for column in ChangeColumn::ALL {
            if let Some(change) = self.table.latest_change(column).await? {
                let newer = latest.map_or(true, |(m, id)| (change.micros, change.id) > (m, id));
                if newer {
                    latest = Some((change.micros, change.id));
                }
            }
        }
        Ok(latest
            .map(|(micros, id)| TimestampCursor::from_micros(micros, id))
            .unwrap_or_default())
    }

    async fn fetch_items(
        &self,
        start: &TimestampCursor,
        end: &TimestampCursor,
    ) -> Result<Vec<Document<TimestampCursor>>> {
        let window = TimestampWindow::new(start, end);

        let mut hits: Vec<(i64, SourceRow)> = Vec::new();
        for column in ChangeColumn::ALL {
            let rows = self
                .table
                .changes_in_window(column, window, self.chunk_limit)
                .await?;
            hits.extend(
                rows.into_iter()
                    .filter_map(|row| row.column_micros(column).map(|micros| (micros, row))),
            );
        }

        let merged = merge_hits(hits, self.chunk_limit);

        debug!(
            table = %self.table.table_name(),
            start = %start.timestamp,
            start_id = start.id,
            end = %end.timestamp,
            items = merged.len(),
            "Timestamp strategy read"
        );

        Ok(merged
            .iter()
            .map(|(micros, row)| {
                let cursor = TimestampCursor::from_micros(*micros, row.id);
                if row.is_deleted() {
                    self.target.delete(cursor, row)
                } else {
                    self.target.upsert(cursor, row, *micros)
                }
            })
            .collect())
    }

    async fn cleanup_deleted(&self, items: &[Document<TimestampCursor>]) -> Result<()> {
        let search = match (&self.search, self.cleanup) {
            (Some(search), cleanup) if cleanup != DeleteCleanup::None => search,
            _ => return Ok(()),
        };

        let ids: Vec<String> = items
            .iter()
            .filter(|doc| doc.is_delete())
            .map(|doc| doc.id().to_string())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let index = self.target.index.as_str();

        if self.cleanup.tags() {
            info!(index = %index, items = ids.len(), "Tagging deleted documents");
            match search
                .update_by_query(index, &ids, TAG_FIELD, &self.deleted_tag)
                .await
            {
                Ok(_) => metrics::record_delete_cleanup("tag", true),
                Err(e) => {
                    metrics::record_delete_cleanup("tag", false);
                    warn!(index = %index, error = %e, "Update-by-query for deleted rows failed");
                }
            }
        }

        if self.cleanup.deletes() {
            info!(index = %index, items = ids.len(), "Deleting documents of deleted rows");
            match search.delete_by_query(index, &ids).await {
                Ok(_) => metrics::record_delete_cleanup("delete", true),
                Err(e) => {
                    metrics::record_delete_cleanup("delete", false);
                    warn!(index = %index, error = %e, "Delete-by-query for deleted rows failed");
                }
            }
        }

        Ok(())
    }
}

/// Order hits by `(timestamp, id)`, keep the first `limit`, then keep only the
/// last occurrence of each row.
fn merge_hits(mut hits: Vec<(i64, SourceRow)>, limit: usize) -> Vec<(i64, SourceRow)> {
    hits.sort_by(|a, b| (a.0, a.1.id).cmp(&(b.0, b.1.id)));
    hits.truncate(limit);

    let last_seen: HashMap<i64, usize> = hits
        .iter()
        .enumerate()
        .map(|(pos, (_, row))| (row.id, pos))
        .collect();

    hits.into_iter()
        .enumerate()
        .filter(|(pos, (_, row))| last_seen.get(&row.id) == Some(pos))
        .map(|(_, hit)| hit)
        .collect()
}

impl SourceReader for TimestampReader {
    type Cursor = TimestampCursor;

    fn latest(&self) -> BoxFuture<'_, TimestampCursor> {
        Box::pin(self.fetch_latest())
    }

    fn items<'a>(
        &'a self,
        start: &'a TimestampCursor,
        end: &'a TimestampCursor,
    ) -> BoxFuture<'a, Vec<Document<TimestampCursor>>> {
        Box::pin(self.fetch_items(start, end))
    }

    fn before_write<'a>(&'a self, items: &'a [Document<TimestampCursor>]) -> BoxFuture<'a, ()> {
        Box::pin(self.cleanup_deleted(items))
    }

    fn name(&self) -> &'static str {
        "timestamp"
    }
}
