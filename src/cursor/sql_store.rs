// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row-backed cursor store.
//!
//! Keeps one row per stream in a `cache` table:
//!
//! ```sql
//! CREATE TABLE cache (
//!     agent      VARCHAR(191) PRIMARY KEY,
//!     position   TEXT NOT NULL,
//!     updated_at BIGINT NOT NULL
//! )
//! ```
//!
//! The table is created on first use. Writes are upserts keyed by stream id,
//! using the dialect's own conflict clause.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database file is
//! contended. Statements are retried with exponential backoff (max 5 attempts).

use super::CursorStore;
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// SQL flavour, picked from the connection URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(SyncError::Config(format!(
                "unsupported cursor store scheme '{}' (expected mysql or sqlite)",
                other
            ))),
        }
    }

    fn upsert_sql(self) -> &'static str {
        match self {
            Self::MySql => {
                r#"
                INSERT INTO cache (agent, position, updated_at)
                VALUES (?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    position = VALUES(position),
                    updated_at = VALUES(updated_at)
                "#
            }
            Self::Sqlite => {
                r#"
                INSERT INTO cache (agent, position, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(agent) DO UPDATE SET
                    position = excluded.position,
                    updated_at = excluded.updated_at
                "#
            }
        }
    }
}

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS cache (
        agent VARCHAR(191) PRIMARY KEY,
        position TEXT NOT NULL,
        updated_at BIGINT NOT NULL
    )
"#;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a statement with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "Cursor statement succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::cursor_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Cursor store backed by a relational `cache` table.
pub struct SqlCursorStore {
    pool: AnyPool,
    dialect: SqlDialect,
    table_ready: OnceCell<()>,
    url: String,
}

impl SqlCursorStore {
    /// Connect to the database at `url` (`mysql://...` or `sqlite://...`).
    pub async fn connect(url: &str) -> Result<Self> {
        let dialect = SqlDialect::from_url(url)?;
        sqlx::any::install_default_drivers();

        info!(dialect = ?dialect, "Initializing SQL cursor store");

        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await?;

        Ok(Self {
            pool,
            dialect,
            table_ready: OnceCell::new(),
            url: url.to_string(),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Connection URL (for diagnostics).
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn ensure_table(&self) -> Result<()> {
        self.table_ready
            .get_or_try_init(|| async {
                execute_with_retry("cursor_create_table", || async {
                    sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await
                })
                .await?;
                debug!("Cursor table ready");
                Ok::<(), SyncError>(())
            })
            .await?;
        Ok(())
    }

    async fn read_row(&self, stream_id: &str) -> Result<Option<String>> {
        self.ensure_table().await?;
        let row: Option<(String,)> = execute_with_retry("cursor_get", || async {
            sqlx::query_as("SELECT position FROM cache WHERE agent = ?")
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
        })
        .await?;
        Ok(row.map(|(position,)| position))
    }

    async fn write_row(&self, stream_id: &str, cursor_json: &str) -> Result<bool> {
        self.ensure_table().await?;
        let now = chrono::Utc::now().timestamp_millis();
        let sql = self.dialect.upsert_sql();

        let result = execute_with_retry("cursor_set", || async {
            sqlx::query(sql)
                .bind(stream_id)
                .bind(cursor_json)
                .bind(now)
                .execute(&self.pool)
                .await
        })
        .await?;

        // MySQL reports 0 affected rows when the upsert changed nothing.
        Ok(result.rows_affected() > 0 || self.dialect == SqlDialect::MySql)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQL cursor store closed");
    }
}

impl CursorStore for SqlCursorStore {
    fn get<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(self.read_row(stream_id))
    }

    fn set<'a>(&'a self, stream_id: &'a str, cursor_json: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.write_row(stream_id, cursor_json))
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}
