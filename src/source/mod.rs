// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change detection against the relational source.
//!
//! Two seams live here:
//!
//! - [`ChangeTable`]: the parameterized queries a strategy needs from the
//!   table (`id`, `data`, `createAt`, `updateAt`, `deleteAt`). Implemented by
//!   [`MySqlTable`] and by [`MemoryTable`] for tests.
//! - [`SourceReader`]: what the engine consumes. One implementation per
//!   strategy: [`KeyReader`] and [`TimestampReader`].
//!
//! Rows are mapped into [`SourceRow`] at the table boundary; nothing untyped
//! crosses into the engine or the bulk writer.

mod key;
mod memory;
mod mysql;
mod timestamp;

pub use key::KeyReader;
pub use memory::MemoryTable;
pub use mysql::MySqlTable;
pub use timestamp::TimestampReader;

use crate::cursor::{Cursor, TimestampCursor};
use crate::document::{version_from_micros, Document};
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

// =============================================================================
// Typed rows
// =============================================================================

/// One row of the change table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SourceRow {
    pub id: i64,
    pub data: Option<String>,
    #[sqlx(rename = "createAt")]
    pub create_at: DateTime<Utc>,
    #[sqlx(rename = "updateAt")]
    pub update_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "deleteAt")]
    pub delete_at: Option<DateTime<Utc>>,
}

impl SourceRow {
    /// A freshly created row.
    pub fn created(id: i64, create_at: DateTime<Utc>) -> Self {
        Self {
            id,
            data: None,
            create_at,
            update_at: None,
            delete_at: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_update(mut self, update_at: DateTime<Utc>) -> Self {
        self.update_at = Some(update_at);
        self
    }

    pub fn with_delete(mut self, delete_at: DateTime<Utc>) -> Self {
        self.delete_at = Some(delete_at);
        self
    }

    /// The value of one of the three mutation columns.
    pub fn column(&self, column: ChangeColumn) -> Option<DateTime<Utc>> {
        match column {
            ChangeColumn::CreateAt => Some(self.create_at),
            ChangeColumn::UpdateAt => self.update_at,
            ChangeColumn::DeleteAt => self.delete_at,
        }
    }

    pub fn column_micros(&self, column: ChangeColumn) -> Option<i64> {
        self.column(column).map(|t| t.timestamp_micros())
    }

    /// Most recent of the three mutation timestamps.
    pub fn last_mutation_micros(&self) -> i64 {
        ChangeColumn::ALL
            .iter()
            .filter_map(|c| self.column_micros(*c))
            .max()
            .unwrap_or_else(|| self.create_at.timestamp_micros())
    }

    /// True if the soft-delete timestamp is set and not older than the other two.
    pub fn is_deleted(&self) -> bool {
        match self.delete_at {
            Some(deleted) => {
                let deleted = deleted.timestamp_micros();
                deleted >= self.create_at.timestamp_micros()
                    && self
                        .update_at
                        .map_or(true, |u| deleted >= u.timestamp_micros())
            }
            None => false,
        }
    }

    /// Document body sent to the index.
    pub fn body(&self) -> Value {
        json!({
            "id": self.id,
            "data": self.data,
            "createAt": rfc3339(Some(self.create_at)),
            "updateAt": rfc3339(self.update_at),
            "deleteAt": rfc3339(self.delete_at),
        })
    }
}

fn rfc3339(t: Option<DateTime<Utc>>) -> Value {
    match t {
        Some(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        None => Value::Null,
    }
}

/// Convert microseconds since the epoch into a UTC timestamp.
///
/// Fails on values outside the representable date range.
pub fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| {
        SyncError::InvalidCursor(format!("timestamp out of range: {} microseconds", micros))
    })
}

// =============================================================================
// Query shapes
// =============================================================================

/// The three mutation columns of the change table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeColumn {
    CreateAt,
    UpdateAt,
    DeleteAt,
}

impl ChangeColumn {
    pub const ALL: [ChangeColumn; 3] = [Self::CreateAt, Self::UpdateAt, Self::DeleteAt];

    /// Column name in the source table.
    pub fn column_name(self) -> &'static str {
        match self {
            Self::CreateAt => "createAt",
            Self::UpdateAt => "updateAt",
            Self::DeleteAt => "deleteAt",
        }
    }
}

impl fmt::Display for ChangeColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Read window of the timestamp strategy, in microseconds.
///
/// A value `t` of a row with key `id` is inside the window iff
/// `(t == start && id > start_id) || (start < t && t <= end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    pub start_micros: i64,
    pub start_id: i64,
    pub end_micros: i64,
}

impl TimestampWindow {
    pub fn new(start: &TimestampCursor, end: &TimestampCursor) -> Self {
        Self {
            start_micros: start.micros(),
            start_id: start.id,
            end_micros: end.micros(),
        }
    }

    pub fn contains(&self, micros: i64, id: i64) -> bool {
        (micros == self.start_micros && id > self.start_id)
            || (micros > self.start_micros && micros <= self.end_micros)
    }
}

/// Most recent mutation seen in one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestChange {
    pub micros: i64,
    pub id: i64,
}

/// Queries a strategy issues against the change table.
pub trait ChangeTable: Send + Sync {
    /// Highest primary key, `None` for an empty table.
    fn max_key(&self) -> BoxFuture<'_, Option<i64>>;

    /// Rows with `after < id <= up_to`, ascending by id, at most `limit`.
    fn rows_by_key(&self, after: i64, up_to: i64, limit: usize) -> BoxFuture<'_, Vec<SourceRow>>;

    /// Most recent non-null value of `column`, ties broken by the highest id.
    fn latest_change(&self, column: ChangeColumn) -> BoxFuture<'_, Option<LatestChange>>;

    /// Rows whose `column` lies inside `window`, ascending by (column, id),
    /// at most `limit`.
    fn changes_in_window(
        &self,
        column: ChangeColumn,
        window: TimestampWindow,
        limit: usize,
    ) -> BoxFuture<'_, Vec<SourceRow>>;

    /// Table name (for logs).
    fn table_name(&self) -> &str;
}

// =============================================================================
// Strategy seam
// =============================================================================

/// Index and id namespace for the documents one stream produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTarget {
    pub index: String,
    pub id_prefix: String,
}

impl DocumentTarget {
    pub fn new(index: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id_prefix: id_prefix.into(),
        }
    }

    pub fn doc_id(&self, row_id: i64) -> String {
        format!("{}{}", self.id_prefix, row_id)
    }

    pub fn upsert<C>(&self, cursor: C, row: &SourceRow, version_micros: i64) -> Document<C> {
        Document::Upsert {
            cursor,
            index: self.index.clone(),
            id: self.doc_id(row.id),
            version: version_from_micros(version_micros),
            body: row.body(),
        }
    }

    pub fn delete<C>(&self, cursor: C, row: &SourceRow) -> Document<C> {
        Document::Delete {
            cursor,
            index: self.index.clone(),
            id: self.doc_id(row.id),
        }
    }
}

/// A change-detection strategy, as seen by the engine.
pub trait SourceReader: Send + Sync {
    type Cursor: Cursor;

    /// Latest position of the source.
    fn latest(&self) -> BoxFuture<'_, Self::Cursor>;

    /// Changed records in the window `(start, end]`, in strategy order and
    /// bounded by the chunk limit.
    fn items<'a>(
        &'a self,
        start: &'a Self::Cursor,
        end: &'a Self::Cursor,
    ) -> BoxFuture<'a, Vec<Document<Self::Cursor>>>;

    /// Advance target for a batch: the cursor of its last document.
    fn cursor_from_items(&self, items: &[Document<Self::Cursor>]) -> Option<Self::Cursor> {
        items.last().map(|doc| doc.cursor().clone())
    }

    /// Auxiliary work issued before the batch is written. Must not fail the
    /// batch; the default does nothing.
    fn before_write<'a>(&'a self, _items: &'a [Document<Self::Cursor>]) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Strategy name (for logs and metrics).
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        micros_to_datetime(secs * 1_000_000).unwrap()
    }

    #[test]
    fn test_window_tie_break() {
        let start = TimestampCursor::from_micros(5_000_000, 5);
        let end = TimestampCursor::from_micros(9_000_000, 0);
        let window = TimestampWindow::new(&start, &end);

        assert!(!window.contains(5_000_000, 5));
        assert!(!window.contains(5_000_000, 4));
        assert!(window.contains(5_000_000, 7));
        assert!(window.contains(5_000_001, 1));
        assert!(window.contains(9_000_000, 100));
        assert!(!window.contains(9_000_001, 1));
        assert!(!window.contains(4_999_999, 100));
    }

    #[test]
    fn test_micros_to_datetime_rejects_out_of_range() {
        assert_eq!(at(90).timestamp(), 90);
        assert_eq!(micros_to_datetime(1_500_123).unwrap().timestamp_subsec_micros(), 500_123);
        assert!(matches!(micros_to_datetime(i64::MAX), Err(SyncError::InvalidCursor(_))));
    }

    #[test]
    fn test_last_mutation_picks_max() {
        let row = SourceRow::created(1, at(10)).with_update(at(20));
        assert_eq!(row.last_mutation_micros(), 20_000_000);

        let row = row.with_delete(at(15));
        assert_eq!(row.last_mutation_micros(), 20_000_000);
        assert!(!row.is_deleted());
    }

    #[test]
    fn test_is_deleted_when_delete_is_latest() {
        let row = SourceRow::created(1, at(10)).with_update(at(20)).with_delete(at(30));
        assert!(row.is_deleted());
        assert!(!SourceRow::created(2, at(10)).is_deleted());
    }

    #[test]
    fn test_body_shape() {
        let row = SourceRow::created(7, at(1_700_000_000))
            .with_data("payload")
            .with_update(at(1_700_000_100));
        let body = row.body();

        assert_eq!(body["id"], 7);
        assert_eq!(body["data"], "payload");
        assert_eq!(body["createAt"], "2023-11-14T22:13:20.000000Z");
        assert_eq!(body["updateAt"], "2023-11-14T22:15:00.000000Z");
        assert!(body["deleteAt"].is_null());
    }

    #[test]
    fn test_document_target() {
        let target = DocumentTarget::new("dummy", "id_");
        let row = SourceRow::created(3, at(1));
        assert_eq!(target.doc_id(3), "id_3");

        let doc = target.upsert(crate::cursor::KeyCursor::new(3), &row, 1_000_000);
        assert_eq!(doc.version(), Some(1_000_000));
        assert_eq!(doc.index(), "dummy");

        let doc = target.delete(crate::cursor::KeyCursor::new(3), &row);
        assert!(doc.is_delete());
        assert_eq!(doc.id(), "id_3");
    }

    #[test]
    fn test_column_names() {
        assert_eq!(ChangeColumn::CreateAt.to_string(), "createAt");
        assert_eq!(ChangeColumn::UpdateAt.column_name(), "updateAt");
        assert_eq!(ChangeColumn::DeleteAt.column_name(), "deleteAt");
    }
}
