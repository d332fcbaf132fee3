// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Monotonic-key strategy.
//!
//! The watermark is the highest primary key written. Rows are read in key
//! order; each becomes an upsert versioned by the row's most recent mutation,
//! so a later mutation delivered out of order still wins.

use super::{ChangeTable, DocumentTarget, SourceReader};
use crate::cursor::KeyCursor;
use crate::document::Document;
use crate::error::Result;
use crate::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Key-based [`SourceReader`].
pub struct KeyReader {
    table: Arc<dyn ChangeTable>,
    target: DocumentTarget,
    chunk_limit: usize,
}

impl KeyReader {
    pub fn new(table: Arc<dyn ChangeTable>, target: DocumentTarget, chunk_limit: usize) -> Self {
        Self {
            table,
            target,
            chunk_limit,
        }
    }

    async fn fetch_latest(&self) -> Result<KeyCursor> {
        let max = self.table.max_key().await?;
        Ok(KeyCursor::new(max.unwrap_or(0)))
    }

    async fn fetch_items(&self, start: &KeyCursor, end: &KeyCursor) -> Result<Vec<Document<KeyCursor>>> {
        let rows = self
            .table
            .rows_by_key(start.id, end.id, self.chunk_limit)
            .await?;

        debug!(
            table = %self.table.table_name(),
            start = start.id,
            end = end.id,
            rows = rows.len(),
            "Key strategy read"
        );

        Ok(rows
            .iter()
            .map(|row| {
                self.target
                    .upsert(KeyCursor::new(row.id), row, row.last_mutation_micros())
            })
            .collect())
    }
}

impl SourceReader for KeyReader {
    type Cursor = KeyCursor;

    fn latest(&self) -> BoxFuture<'_, KeyCursor> {
        Box::pin(self.fetch_latest())
    }

    fn items<'a>(
        &'a self,
        start: &'a KeyCursor,
        end: &'a KeyCursor,
    ) -> BoxFuture<'a, Vec<Document<KeyCursor>>> {
        Box::pin(self.fetch_items(start, end))
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
