//! Configuration for the sync engine.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON. Every section has defaults, so a minimal document only needs the
//! connection URLs.
//!
//! # Quick Start
//!
//! ```rust
//! use index_sync_engine::config::{SyncConfig, Strategy};
//!
//! let mut config = SyncConfig::for_testing("timestamp-agent-1");
//! config.source.strategy = Strategy::Timestamp;
//! config.stream.chunk_limit = 500;
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── stream: StreamConfig      # agent id, target index, chunk limit/delay
//! ├── source: SourceConfig      # change table, strategy, delete cleanup
//! ├── search: SearchConfig      # index hosts, auth, timeouts
//! └── cursor: CursorConfig      # redis entry or sql row
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! stream:
//!   stream_id: "timestamp-agent-1"
//!   index: "dummy"
//!   chunk_limit: 1000
//!   chunk_delay: "100ms"
//!
//! source:
//!   database_url: "mysql://sync:secret@db:3306/app"
//!   table: "dummy"
//!   strategy: timestamp
//!   delete_cleanup: tag
//!
//! search:
//!   hosts: ["http://search:9200"]
//!
//! cursor:
//!   backend:
//!     type: redis
//!     url: "redis://cache:6379"
//! ```

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object for one replication stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cursor: CursorConfig,
}

impl SyncConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(stream_id: &str) -> Self {
        Self {
            stream: StreamConfig {
                stream_id: stream_id.to_string(),
                chunk_delay: "1ms".to_string(),
                ..Default::default()
            },
            source: SourceConfig::default(),
            search: SearchConfig::default(),
            cursor: CursorConfig::default(),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.stream_id.trim().is_empty() {
            return Err(SyncError::Config("stream.stream_id must not be empty".into()));
        }
        if self.stream.index.trim().is_empty() {
            return Err(SyncError::Config("stream.index must not be empty".into()));
        }
        if self.stream.chunk_limit == 0 {
            return Err(SyncError::Config("stream.chunk_limit must be greater than 0".into()));
        }
        if self.search.hosts.is_empty() {
            return Err(SyncError::Config("search.hosts must list at least one host".into()));
        }
        if self.source.table.trim().is_empty()
            || !self
                .source
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SyncError::Config(format!(
                "source.table {:?} is not a plain identifier",
                self.source.table
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StreamConfig: identity and pacing of one replication stream
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-stream settings consumed by the engine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream/agent identifier. Keys the cursor in the cursor store, so it must
    /// be unique per deployed strategy instance.
    #[serde(default = "default_stream_id")]
    pub stream_id: String,

    /// Target index name for every document of this stream.
    #[serde(default = "default_index")]
    pub index: String,

    /// Maximum documents fetched per chunk.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,

    /// Delay between chunks as a duration string (e.g., "100ms").
    /// Also used as the recovery delay after a failed iteration.
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay: String,

    /// Prefix applied to row keys to form document ids.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_stream_id() -> String {
    "timestamp-agent".to_string()
}

fn default_index() -> String {
    "test".to_string()
}

fn default_chunk_limit() -> usize {
    1000
}

fn default_chunk_delay() -> String {
    "100ms".to_string()
}

fn default_id_prefix() -> String {
    "id_".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_id: default_stream_id(),
            index: default_index(),
            chunk_limit: default_chunk_limit(),
            chunk_delay: default_chunk_delay(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl StreamConfig {
    /// Parse the chunk_delay string to a Duration.
    pub fn chunk_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.chunk_delay).unwrap_or(Duration::from_millis(100))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SourceConfig: change table and detection strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Change-detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Monotonic primary key watermark. Sees inserts only.
    Key,
    /// (timestamp, id) watermark over create/update/delete timestamps.
    Timestamp,
}

/// Out-of-band cleanup issued for Delete documents before the bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteCleanup {
    None,
    /// Update-by-query setting `tag` on matching documents.
    Tag,
    /// Delete-by-query removing matching documents.
    Delete,
    /// Tag first, then delete.
    TagAndDelete,
}

impl DeleteCleanup {
    pub fn tags(self) -> bool {
        matches!(self, Self::Tag | Self::TagAndDelete)
    }

    pub fn deletes(self) -> bool {
        matches!(self, Self::Delete | Self::TagAndDelete)
    }
}

/// Relational source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection URL of the relational store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Change table name. Must be a plain identifier.
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    #[serde(default = "default_delete_cleanup")]
    pub delete_cleanup: DeleteCleanup,

    /// Value written to `tag` by the update-by-query cleanup.
    #[serde(default = "default_deleted_tag")]
    pub deleted_tag: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "mysql://root@localhost:3306/sync".to_string()
}

fn default_table() -> String {
    "dummy".to_string()
}

fn default_strategy() -> Strategy {
    Strategy::Timestamp
}

fn default_delete_cleanup() -> DeleteCleanup {
    DeleteCleanup::None
}

fn default_deleted_tag() -> String {
    "DELETED".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            table: default_table(),
            strategy: default_strategy(),
            delete_cleanup: default_delete_cleanup(),
            deleted_tag: default_deleted_tag(),
            max_connections: default_max_connections(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SearchConfig: index cluster connection
// ═══════════════════════════════════════════════════════════════════════════════

/// Search index connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URLs, used round-robin.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Takes precedence over basic auth when set.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorConfig: where the watermark lives
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor store backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorBackend {
    /// One cache entry per stream id.
    Redis { url: String },
    /// One row per stream id in a `cache` table of a relational store.
    Sql { url: String },
}

/// Cursor persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    pub backend: CursorBackend,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            backend: CursorBackend::Redis {
                url: "redis://127.0.0.1:6379".to_string(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
