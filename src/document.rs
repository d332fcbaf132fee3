// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Documents produced by a source strategy and consumed by the bulk writer.
//!
//! Every document carries the cursor of the row it came from, so the strategy
//! can derive the advance target from whatever the chunk actually returned.

use serde::Serialize;
use serde_json::Value;

/// One change destined for the search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document<C> {
    /// Index the body, accepted only if `version` >= the stored version.
    Upsert {
        cursor: C,
        index: String,
        id: String,
        /// Microseconds since the epoch of the mutation that produced this row.
        version: u64,
        body: Value,
    },
    /// Remove the document.
    Delete { cursor: C, index: String, id: String },
}

impl<C> Document<C> {
    pub fn cursor(&self) -> &C {
        match self {
            Self::Upsert { cursor, .. } | Self::Delete { cursor, .. } => cursor,
        }
    }

    pub fn index(&self) -> &str {
        match self {
            Self::Upsert { index, .. } | Self::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    /// Version of an upsert; deletes carry none.
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Upsert { version, .. } => Some(*version),
            Self::Delete { .. } => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// Clamp a microsecond timestamp into a valid index version.
pub fn version_from_micros(micros: i64) -> u64 {
    micros.max(0) as u64
}

/// Snapshot of one executed iteration. Reported, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult<C> {
    pub current: C,
    pub latest: C,
    pub latest_from_items: C,
    pub items: Vec<Document<C>>,
}

impl<C> ChunkResult<C> {
    pub fn upserts(&self) -> usize {
        self.items.iter().filter(|d| !d.is_delete()).count()
    }

    pub fn deletes(&self) -> usize {
        self.items.iter().filter(|d| d.is_delete()).count()
    }
}
