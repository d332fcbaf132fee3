//! # Index Sync Engine
//!
//! Incremental replication of a relational change table into a search index.
//!
//! ## Architecture
//!
//! One [`SyncEngine`] drives one stream: it asks a change-detection strategy
//! for the rows past its cursor, writes them as one versioned bulk request,
//! and persists the position of the last written row:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            index-sync-engine                              │
//! │                                                                           │
//! │  ┌──────────────┐    ┌──────────────┐    ┌────────────────────────────┐   │
//! │  │ SourceReader │───►│  SyncEngine  │───►│ BulkWriter (external_gte)  │   │
//! │  │ key | (ts,id)│    │  (one loop)  │    │ classify → accept / retry  │   │
//! │  └──────────────┘    └──────────────┘    └────────────────────────────┘   │
//! │         ▲                   │    │                                        │
//! │         │                   ▼    ▼                                        │
//! │  ┌──────────────┐    ┌─────────────┐  ┌──────────────────────────┐        │
//! │  │ ChangeTable  │    │ CursorStore │  │ EventSender → EventLogger│        │
//! │  │ (MySQL)      │    │ Redis | SQL │  │ (tracing + metrics)      │        │
//! │  └──────────────┘    └─────────────┘  └──────────────────────────┘        │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! At-least-once. The cursor only moves after the index accepted a chunk, and
//! every document carries an `external_gte` version, so re-delivery after a
//! crash or a retried chunk can never regress a document.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use index_sync_engine::{timestamp_engine, EventLogger, EventSender, SyncConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> index_sync_engine::Result<()> {
//!     let config = SyncConfig::for_testing("timestamp-agent");
//!     let (events, rx) = EventSender::channel();
//!     EventLogger::new(config.stream.stream_id.clone()).spawn(rx);
//!
//!     let mut engine = timestamp_engine(&config, events).await?;
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         shutdown_tx.send(true).ok();
//!     });
//!
//!     engine.run(shutdown_rx).await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod bulk;
pub mod config;
pub mod cursor;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod search;
pub mod source;

/// Boxed future returned by the crate's object-safe traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = error::Result<T>> + Send + 'a>>;

// Re-exports for convenience
pub use bulk::{BulkOutcome, BulkReport, BulkWriter};
pub use config::{CursorBackend, DeleteCleanup, SearchConfig, SourceConfig, Strategy, StreamConfig, SyncConfig};
pub use cursor::{open_cursor_store, Cursor, CursorStore, KeyCursor, TimestampCursor};
pub use document::{ChunkResult, Document};
pub use engine::{key_engine, timestamp_engine, IterationOutcome, IterationReport, SyncEngine};
pub use error::{Result, SyncError};
pub use events::{EventLogger, EventSender, SkipReason, SyncEvent};
pub use search::{HttpSearchClient, SearchClient};
pub use source::{ChangeTable, KeyReader, SourceReader, TimestampReader};
