// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor types and cursor persistence.
//!
//! A cursor is the watermark of one replication stream. Its shape belongs to
//! the change-detection strategy ([`KeyCursor`] or [`TimestampCursor`]); the
//! engine only ever serializes it, compares serialized forms, and hands it back
//! to the strategy.
//!
//! # Persistence
//!
//! [`CursorStore`] is deliberately untyped: it stores the cursor's JSON under
//! the stream id. Two backends ship with the crate:
//!
//! - [`RedisCursorStore`]: one cache entry per stream
//! - [`SqlCursorStore`]: one row per stream in a `cache` table
//!
//! plus [`MemoryCursorStore`] for tests.
//!
//! ## Cursor Semantics
//!
//! The stored value is the position of the **last successfully written**
//! document. On restart the strategy resumes strictly after it.
//!
//! ```text
//! read chunk → bulk write accepted → persist cursor of last item
//!              (crash here = same chunk re-read, versions make it idempotent)
//! ```

mod redis_store;
mod sql_store;

pub use redis_store::RedisCursorStore;
pub use sql_store::{SqlCursorStore, SqlDialect};

use crate::config::{CursorBackend, CursorConfig};
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A strategy-defined position marker.
///
/// `Default` is the zero position used when no cursor has been stored yet.
pub trait Cursor:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Serialized form. Two cursors are "the same position" iff their
    /// fingerprints are equal.
    fn fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Scalar approximation of the position, for gauges and logs only.
    fn position_hint(&self) -> f64;
}

/// Watermark of the key strategy: highest primary key written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCursor {
    pub id: i64,
}

impl KeyCursor {
    pub fn new(id: i64) -> Self {
        Self { id }
    }
}

impl Cursor for KeyCursor {
    fn position_hint(&self) -> f64 {
        self.id as f64
    }
}

/// Watermark of the timestamp strategy.
///
/// `timestamp` is fractional Unix seconds (microsecond precision); `id` breaks
/// ties between rows sharing that timestamp. Equality and order both work on
/// whole microseconds, so they always agree.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampCursor {
    pub timestamp: f64,
    pub id: i64,
}

impl TimestampCursor {
    pub fn new(timestamp: f64, id: i64) -> Self {
        Self { timestamp, id }
    }

    /// Build from microseconds since the epoch.
    pub fn from_micros(micros: i64, id: i64) -> Self {
        Self {
            timestamp: micros as f64 / 1_000_000.0,
            id,
        }
    }

    /// Timestamp as whole microseconds since the epoch.
    pub fn micros(&self) -> i64 {
        (self.timestamp * 1_000_000.0).round() as i64
    }

    /// Order by (timestamp, id), the order the strategy reads in.
    pub fn cmp_position(&self, other: &Self) -> Ordering {
        self.micros()
            .cmp(&other.micros())
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialEq for TimestampCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_position(other) == Ordering::Equal
    }
}

impl Eq for TimestampCursor {}

impl PartialOrd for TimestampCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_position(other))
    }
}

impl Cursor for TimestampCursor {
    fn position_hint(&self) -> f64 {
        self.timestamp
    }
}

/// Persists the serialized cursor of a stream.
///
/// Implementations need no transactional coupling with the source or the
/// index: the cursor write is the only durability point of "what was synced".
pub trait CursorStore: Send + Sync {
    /// Stored cursor JSON, or `None` if this stream has never been persisted.
    fn get<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, Option<String>>;

    /// Store cursor JSON. Returns whether the backend acknowledged the write.
    fn set<'a>(&'a self, stream_id: &'a str, cursor_json: &'a str) -> BoxFuture<'a, bool>;

    /// Backend name (for logs and errors).
    fn name(&self) -> &'static str;
}

/// Read a typed cursor, falling back to the zero position.
///
/// Missing fields in the stored JSON are filled with zero, so `{}` and an
/// absent entry both load as `C::default()`.
pub async fn load_cursor<C: Cursor>(store: &dyn CursorStore, stream_id: &str) -> Result<C> {
    match store.get(stream_id).await? {
        Some(raw) if !raw.trim().is_empty() => {
            let cursor = serde_json::from_str(&raw)?;
            debug!(stream_id = %stream_id, backend = store.name(), cursor = %raw, "Loaded cursor");
            Ok(cursor)
        }
        _ => {
            debug!(stream_id = %stream_id, backend = store.name(), "No stored cursor, starting from zero");
            Ok(C::default())
        }
    }
}

/// Serialize and store a typed cursor.
pub async fn persist_cursor<C: Cursor>(
    store: &dyn CursorStore,
    stream_id: &str,
    cursor: &C,
) -> Result<bool> {
    let json = cursor.fingerprint()?;
    store.set(stream_id, &json).await
}

/// Connect the configured backend.
pub async fn open_cursor_store(config: &CursorConfig) -> Result<Arc<dyn CursorStore>> {
    match &config.backend {
        CursorBackend::Redis { url } => Ok(Arc::new(RedisCursorStore::connect(url).await?)),
        CursorBackend::Sql { url } => Ok(Arc::new(SqlCursorStore::connect(url).await?)),
    }
}

// ============================================================================
// Memory store (for testing)
// ============================================================================

/// In-memory cursor store.
///
/// Keeps every write in order so tests can assert on the persisted history.
#[derive(Default)]
pub struct MemoryCursorStore {
    entries: RwLock<HashMap<String, String>>,
    history: RwLock<Vec<(String, String)>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with an initial entry.
    pub fn with_entry(stream_id: &str, cursor_json: &str) -> Self {
        let mut entries = HashMap::new();
        entries.insert(stream_id.to_string(), cursor_json.to_string());
        Self {
            entries: RwLock::new(entries),
            ..Default::default()
        }
    }

    /// Make subsequent `set` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Make subsequent `get` calls fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, AtomicOrdering::SeqCst);
    }

    /// Every successful write, oldest first.
    pub async fn history(&self) -> Vec<(String, String)> {
        self.history.read().await.clone()
    }

    pub async fn raw(&self, stream_id: &str) -> Option<String> {
        self.entries.read().await.get(stream_id).cloned()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            if self.fail_reads.load(AtomicOrdering::SeqCst) {
                return Err(SyncError::cursor_store("memory", "injected read failure"));
            }
            Ok(self.entries.read().await.get(stream_id).cloned())
        })
    }

    fn set<'a>(&'a self, stream_id: &'a str, cursor_json: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.fail_writes.load(AtomicOrdering::SeqCst) {
                return Err(SyncError::cursor_store("memory", "injected write failure"));
            }
            self.entries
                .write()
                .await
                .insert(stream_id.to_string(), cursor_json.to_string());
            self.history
                .write()
                .await
                .push((stream_id.to_string(), cursor_json.to_string()));
            Ok(true)
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_cursor_is_zero() {
        let store = MemoryCursorStore::new();
        let key: KeyCursor = load_cursor(&store, "agent").await.unwrap();
        assert_eq!(key, KeyCursor::new(0));

        let ts: TimestampCursor = load_cursor(&store, "agent").await.unwrap();
        assert_eq!(ts, TimestampCursor::new(0.0, 0));
    }

    #[tokio::test]
    async fn test_load_partial_cursor_fills_zero() {
        let store = MemoryCursorStore::with_entry("agent", r#"{"timestamp": 12.5}"#);
        let ts: TimestampCursor = load_cursor(&store, "agent").await.unwrap();
        assert_eq!(ts, TimestampCursor::new(12.5, 0));
    }

    #[tokio::test]
    async fn test_load_empty_object() {
        let store = MemoryCursorStore::with_entry("agent", "{}");
        let key: KeyCursor = load_cursor(&store, "agent").await.unwrap();
        assert_eq!(key.id, 0);
    }

    #[tokio::test]
    async fn test_load_malformed_cursor_errors() {
        let store = MemoryCursorStore::with_entry("agent", "not json");
        let result: Result<KeyCursor> = load_cursor(&store, "agent").await;
        assert!(matches!(result, Err(SyncError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let store = MemoryCursorStore::new();
        let cursor = TimestampCursor::from_micros(1_700_000_000_123_456, 42);
        assert!(persist_cursor(&store, "agent", &cursor).await.unwrap());

        let loaded: TimestampCursor = load_cursor(&store, "agent").await.unwrap();
        assert_eq!(loaded.micros(), 1_700_000_000_123_456);
        assert_eq!(loaded.id, 42);
        assert_eq!(store.history().await.len(), 1);
    }

    #[test]
    fn test_timestamp_equality_agrees_with_order() {
        // Both round to the same microsecond.
        let a = TimestampCursor::new(1.000_000_1, 3);
        let b = TimestampCursor::new(1.000_000_2, 3);
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));
        assert_eq!(a, b);

        let c = TimestampCursor::new(1.000_001, 3);
        assert!(a < c);
        assert_ne!(a, c);
        assert_ne!(a, TimestampCursor::new(1.000_000_1, 4));
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let store = MemoryCursorStore::new();
        persist_cursor(&store, "key-agent", &KeyCursor::new(10)).await.unwrap();
        persist_cursor(&store, "other-agent", &KeyCursor::new(99)).await.unwrap();

        let a: KeyCursor = load_cursor(&store, "key-agent").await.unwrap();
        let b: KeyCursor = load_cursor(&store, "other-agent").await.unwrap();
        assert_eq!(a.id, 10);
        assert_eq!(b.id, 99);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryCursorStore::new();
        store.set_fail_writes(true);
        assert!(persist_cursor(&store, "a", &KeyCursor::new(1)).await.is_err());
        store.set_fail_reads(true);
        assert!(load_cursor::<KeyCursor>(&store, "a").await.is_err());
    }

    #[tokio::test]
    async fn test_open_sql_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cursor.db").display());
        let config = CursorConfig {
            backend: CursorBackend::Sql { url },
        };

        let store = open_cursor_store(&config).await.unwrap();
        assert_eq!(store.name(), "sql");
        persist_cursor(store.as_ref(), "agent", &KeyCursor::new(3)).await.unwrap();
        let loaded: KeyCursor = load_cursor(store.as_ref(), "agent").await.unwrap();
        assert_eq!(loaded, KeyCursor::new(3));
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_sql_scheme() {
        let config = CursorConfig {
            backend: CursorBackend::Sql {
                url: "postgres://localhost/db".into(),
            },
        };
        assert!(matches!(open_cursor_store(&config).await, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_fingerprint_is_structural() {
        let a = TimestampCursor::new(1.5, 3);
        let b = TimestampCursor::new(1.5, 3);
        let c = TimestampCursor::new(1.5, 4);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
        assert_eq!(KeyCursor::new(7).fingerprint().unwrap(), r#"{"id":7}"#);
    }

    #[test]
    fn test_timestamp_cursor_ordering() {
        let t = TimestampCursor::from_micros(5_000_000, 5);
        assert!(t < TimestampCursor::from_micros(5_000_000, 7));
        assert!(t < TimestampCursor::from_micros(5_000_001, 1));
        assert!(t > TimestampCursor::from_micros(4_999_999, 100));
        assert_eq!(t.cmp_position(&TimestampCursor::new(5.0, 5)), Ordering::Equal);
    }

    #[test]
    fn test_micros_roundtrip() {
        for micros in [0i64, 1, 999_999, 1_700_000_000_000_001, 1_699_999_999_999_999] {
            assert_eq!(TimestampCursor::from_micros(micros, 0).micros(), micros);
        }
    }
}
