// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MySQL change table.
//!
//! Expected columns: `id` (integer primary key), `data` (text, nullable),
//! `createAt`, `updateAt`, `deleteAt` (`DATETIME(6)`/`TIMESTAMP(6)`, the last two
//! nullable). Timestamps are bound as `DateTime<Utc>`, so window boundaries are
//! compared exactly at microsecond precision.

use super::{micros_to_datetime, ChangeColumn, ChangeTable, LatestChange, SourceRow, TimestampWindow};
use crate::config::SourceConfig;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "id, data, createAt, updateAt, deleteAt";

/// Change table read through a MySQL pool.
pub struct MySqlTable {
    pool: MySqlPool,
    table: String,
}

impl MySqlTable {
    /// Connect a pool sized by `config.max_connections`.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        info!(table = %config.table, "Connecting source database");
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await?;
        Self::from_pool(pool, &config.table)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: MySqlPool, table: &str) -> Result<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SyncError::Config(format!(
                "table name {:?} is not a plain identifier",
                table
            )));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn query_max_key(&self) -> Result<Option<i64>> {
        let started = Instant::now();
        let sql = format!("SELECT MAX(id) FROM {}", self.table);
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        metrics::record_source_query("max_key", started.elapsed());
        Ok(max)
    }

    async fn query_rows_by_key(&self, after: i64, up_to: i64, limit: usize) -> Result<Vec<SourceRow>> {
        let started = Instant::now();
        let sql = format!(
            "SELECT {} FROM {} WHERE id > ? AND id <= ? ORDER BY id LIMIT ?",
            SELECT_COLUMNS, self.table
        );
        let rows: Vec<SourceRow> = sqlx::query_as(&sql)
            .bind(after)
            .bind(up_to)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        metrics::record_source_query("rows_by_key", started.elapsed());
        debug!(table = %self.table, after, up_to, rows = rows.len(), "Fetched rows by key");
        Ok(rows)
    }

    async fn query_latest_change(&self, column: ChangeColumn) -> Result<Option<LatestChange>> {
        let started = Instant::now();
        let col = column.column_name();
        let sql = format!(
            "SELECT id, {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col} DESC, id DESC LIMIT 1",
            col = col,
            table = self.table
        );
        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        metrics::record_source_query("latest_change", started.elapsed());
        Ok(row.map(|(id, at)| LatestChange {
            micros: at.timestamp_micros(),
            id,
        }))
    }

    async fn query_changes_in_window(
        &self,
        column: ChangeColumn,
        window: TimestampWindow,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        let started = Instant::now();
        let col = column.column_name();
        let sql = format!(
            "SELECT {select} FROM {table} \
             WHERE ({col} = ? AND id > ?) OR ({col} > ? AND {col} <= ?) \
             ORDER BY {col}, id LIMIT ?",
            select = SELECT_COLUMNS,
            table = self.table,
            col = col
        );
        let start = micros_to_datetime(window.start_micros)?;
        let end = micros_to_datetime(window.end_micros)?;
        let rows: Vec<SourceRow> = sqlx::query_as(&sql)
            .bind(start)
            .bind(window.start_id)
            .bind(start)
            .bind(end)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        metrics::record_source_query("changes_in_window", started.elapsed());
        debug!(
            table = %self.table,
            column = %column,
            rows = rows.len(),
            "Fetched rows in window"
        );
        Ok(rows)
    }
}

impl ChangeTable for MySqlTable {
    fn max_key(&self) -> BoxFuture<'_, Option<i64>> {
        Box::pin(self.query_max_key())
    }

    fn rows_by_key(&self, after: i64, up_to: i64, limit: usize) -> BoxFuture<'_, Vec<SourceRow>> {
        Box::pin(self.query_rows_by_key(after, up_to, limit))
    }

    fn latest_change(&self, column: ChangeColumn) -> BoxFuture<'_, Option<LatestChange>> {
        Box::pin(self.query_latest_change(column))
    }

    fn changes_in_window(
        &self,
        column: ChangeColumn,
        window: TimestampWindow,
        limit: usize,
    ) -> BoxFuture<'_, Vec<SourceRow>> {
        Box::pin(self.query_changes_in_window(column, window, limit))
    }

    fn table_name(&self) -> &str {
        &self.table
    }
}
