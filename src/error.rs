// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are categorized by the collaborator they came from (source table,
//! cursor store, search index) and carry enough context to be useful in an
//! `UncaughtError` event.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Source` | Yes | Change table query failed (pool timeout, connection reset) |
//! | `CursorStore` | Yes | Cursor row/entry could not be read or written |
//! | `Redis` | Yes | Cache store network errors |
//! | `Search` | Yes | Bulk request transport failure or non-2xx response |
//! | `Serialization` | No | Cursor or document JSON could not be (de)serialized |
//! | `Config` | No | Configuration invalid |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! The engine never gives up on an iteration: every error is reported and the
//! same window is tried again after the chunk delay. [`SyncError::is_retryable()`]
//! only tells operators whether waiting is likely to help.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Change table query error.
    #[error("Source error: {0}")]
    Source(#[from] sqlx::Error),

    /// Cursor store read/write failure.
    ///
    /// `backend` names the store (`"redis"`, `"sql"`, `"memory"`).
    #[error("Cursor store error ({backend}): {message}")]
    CursorStore { backend: String, message: String },

    /// Redis command error.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Search index request failure.
    ///
    /// `status` is set when the index answered with a non-success HTTP status.
    #[error("Search index error: {message}")]
    Search {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cursor position the source cannot represent.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a cursor store error
    pub fn cursor_store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CursorStore {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a search error from a transport failure
    pub fn search(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Search {
            message: message.into(),
            status: source.status().map(|s| s.as_u16()),
            source: Some(source),
        }
    }

    /// Create a search error for a non-success HTTP status
    pub fn search_status(message: impl Into<String>, status: u16) -> Self {
        Self::Search {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(_) => true,
            Self::CursorStore { .. } => true,
            Self::Redis { .. } => true,
            // 4xx on the bulk endpoint means the request itself is malformed
            Self::Search { status, .. } => !matches!(status, Some(400..=499)),
            Self::Serialization(_) => false,
            Self::InvalidCursor(_) => false,
            Self::Config(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}
