// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned bulk writes and response classification.
//!
//! Upserts become `index` actions with `version_type = external_gte`, so an
//! older version arriving late is rejected by the index instead of
//! overwriting newer data. Deletes become `delete` actions.
//!
//! # Classification
//!
//! | Per-item result | Counts as |
//! |-----------------|-----------|
//! | no `error` | accepted |
//! | `version_conflict_engine_exception` | ignorable |
//! | `index_not_found_exception` | ignorable |
//! | any other error type | hard failure |
//!
//! The batch is `Failed` if any hard failure exists, `PartiallyIgnorable` if
//! it only has ignorable failures, `AllAccepted` otherwise. The top-level
//! `errors` flag only decides when there is no item list to inspect: flagged
//! without items is `Failed`.

use crate::document::Document;
use crate::error::Result;
use crate::metrics;
use crate::search::SearchClient;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Version type sent with every upsert.
pub const VERSION_TYPE: &str = "external_gte";

/// Per-item error types that do not block cursor advancement.
pub const IGNORABLE_ERROR_TYPES: [&str; 2] =
    ["version_conflict_engine_exception", "index_not_found_exception"];

// =============================================================================
// Actions
// =============================================================================

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        index: String,
        id: String,
        version: u64,
        body: Value,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkAction {
    pub fn from_document<C>(doc: &Document<C>) -> Self {
        match doc {
            Document::Upsert {
                index,
                id,
                version,
                body,
                ..
            } => Self::Index {
                index: index.clone(),
                id: id.clone(),
                version: *version,
                body: body.clone(),
            },
            Document::Delete { index, id, .. } => Self::Delete {
                index: index.clone(),
                id: id.clone(),
            },
        }
    }

    /// Action/metadata line.
    pub fn metadata(&self) -> Value {
        match self {
            Self::Index {
                index, id, version, ..
            } => json!({
                "index": {
                    "_index": index,
                    "_id": id,
                    "version": version,
                    "version_type": VERSION_TYPE,
                }
            }),
            Self::Delete { index, id } => json!({
                "delete": {
                    "_index": index,
                    "_id": id,
                }
            }),
        }
    }

    /// Source line, present for index actions only.
    pub fn source(&self) -> Option<&Value> {
        match self {
            Self::Index { body, .. } => Some(body),
            Self::Delete { .. } => None,
        }
    }

    pub fn index(&self) -> &str {
        match self {
            Self::Index { index, .. } | Self::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    /// Operation key used in the request and the response items.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Index { .. } => "index",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Serialize actions as an NDJSON bulk body (trailing newline included).
pub fn to_ndjson(actions: &[BulkAction]) -> Result<String> {
    let mut body = String::new();
    for action in actions {
        body.push_str(&serde_json::to_string(&action.metadata())?);
        body.push('\n');
        if let Some(source) = action.source() {
            body.push_str(&serde_json::to_string(source)?);
            body.push('\n');
        }
    }
    Ok(body)
}

// =============================================================================
// Classification
// =============================================================================

/// Delivery outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BulkOutcome {
    AllAccepted,
    PartiallyIgnorable,
    Failed,
}

impl BulkOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllAccepted => "all_accepted",
            Self::PartiallyIgnorable => "partially_ignorable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BulkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed item of a bulk response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemFailure {
    pub op: String,
    pub id: Option<String>,
    pub status: Option<u16>,
    pub error_type: String,
    pub reason: Option<String>,
    pub ignorable: bool,
}

pub fn is_ignorable_error(error_type: &str) -> bool {
    IGNORABLE_ERROR_TYPES.contains(&error_type)
}

/// Collect the failed items of a bulk response.
///
/// Returns `None` when the response has no item list.
pub fn item_failures(response: &Value) -> Option<Vec<BulkItemFailure>> {
    let items = response.get("items")?.as_array()?;

    let failures = items
        .iter()
        .filter_map(|item| {
            let (op, result) = item.as_object()?.iter().next()?;
            let error = result.get("error").filter(|e| !e.is_null())?;
            let error_type = match error {
                Value::Object(_) => error
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                Value::String(s) => s.clone(),
                _ => "unknown".to_string(),
            };
            Some(BulkItemFailure {
                op: op.clone(),
                id: result.get("_id").and_then(Value::as_str).map(str::to_string),
                status: result
                    .get("status")
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok()),
                ignorable: is_ignorable_error(&error_type),
                error_type,
                reason: error.get("reason").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect();

    Some(failures)
}

/// Classify a raw bulk response. Never panics on malformed input.
pub fn classify(response: &Value) -> BulkOutcome {
    let errors_flag = response
        .get("errors")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match item_failures(response) {
        Some(failures) if failures.is_empty() => BulkOutcome::AllAccepted,
        Some(failures) if failures.iter().all(|f| f.ignorable) => BulkOutcome::PartiallyIgnorable,
        Some(_) => BulkOutcome::Failed,
        None if errors_flag => BulkOutcome::Failed,
        None => BulkOutcome::AllAccepted,
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Result of one bulk write.
#[derive(Debug, Clone)]
pub struct BulkReport {
    pub outcome: BulkOutcome,
    pub failures: Vec<BulkItemFailure>,
    /// Raw index response, forwarded in bulk error events.
    pub response: Value,
}

/// Turns documents into one versioned bulk request and classifies the answer.
pub struct BulkWriter {
    client: Arc<dyn SearchClient>,
}

impl BulkWriter {
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self { client }
    }

    /// Submit `docs` as one batch with refresh-on-write.
    pub async fn write<C>(&self, docs: &[Document<C>]) -> Result<BulkReport> {
        if docs.is_empty() {
            return Ok(BulkReport {
                outcome: BulkOutcome::AllAccepted,
                failures: Vec::new(),
                response: json!({"errors": false, "items": []}),
            });
        }

        let actions: Vec<BulkAction> = docs.iter().map(BulkAction::from_document).collect();

        let started = Instant::now();
        let response = self.client.bulk(&actions).await?;
        let elapsed = started.elapsed();

        let outcome = classify(&response);
        let failures = item_failures(&response).unwrap_or_default();

        metrics::record_bulk(outcome.as_str(), actions.len(), elapsed);
        debug!(
            actions = actions.len(),
            outcome = %outcome,
            failures = failures.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Bulk write completed"
        );

        Ok(BulkReport {
            outcome,
            failures,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::KeyCursor;
    use crate::search::MemoryIndex;

    fn item(op: &str, status: u16, error_type: Option<&str>) -> Value {
        let mut result = json!({"_id": "id_1", "status": status});
        if let Some(t) = error_type {
            result["error"] = json!({"type": t, "reason": "because"});
        }
        let mut entry = serde_json::Map::new();
        entry.insert(op.to_string(), result);
        Value::Object(entry)
    }

    fn response(errors: bool, items: Vec<Value>) -> Value {
        json!({"took": 3, "errors": errors, "items": items})
    }

    #[test]
    fn test_classify_error_table() {
        let conflict = response(true, vec![item("index", 409, Some("version_conflict_engine_exception"))]);
        assert_eq!(classify(&conflict), BulkOutcome::PartiallyIgnorable);

        let missing = response(true, vec![item("index", 404, Some("index_not_found_exception"))]);
        assert_eq!(classify(&missing), BulkOutcome::PartiallyIgnorable);

        let mapping = response(true, vec![item("index", 400, Some("mapper_parsing_exception"))]);
        assert_eq!(classify(&mapping), BulkOutcome::Failed);
    }

    #[test]
    fn test_classify_all_accepted() {
        let ok = response(false, vec![item("index", 201, None), item("delete", 200, None)]);
        assert_eq!(classify(&ok), BulkOutcome::AllAccepted);
    }

    #[test]
    fn test_classify_mixed_is_failed() {
        let mixed = response(
            true,
            vec![
                item("index", 201, None),
                item("index", 409, Some("version_conflict_engine_exception")),
                item("delete", 400, Some("illegal_argument_exception")),
            ],
        );
        assert_eq!(classify(&mixed), BulkOutcome::Failed);
    }

    #[test]
    fn test_classify_errors_without_items_is_failed() {
        assert_eq!(classify(&json!({"errors": true})), BulkOutcome::Failed);
        assert_eq!(classify(&json!({"errors": true, "items": "nope"})), BulkOutcome::Failed);
    }

    #[test]
    fn test_classify_flag_without_failed_items_is_accepted() {
        assert_eq!(classify(&json!({"errors": true, "items": []})), BulkOutcome::AllAccepted);
        let flagged = response(true, vec![item("index", 201, None), item("delete", 200, None)]);
        assert_eq!(classify(&flagged), BulkOutcome::AllAccepted);
    }

    #[test]
    fn test_classify_malformed_is_safe() {
        assert_eq!(classify(&Value::Null), BulkOutcome::AllAccepted);
        assert_eq!(classify(&json!([1, 2, 3])), BulkOutcome::AllAccepted);
        assert_eq!(
            classify(&json!({"errors": true, "items": [1, {"index": 3}, {"index": {"error": 5}}]})),
            BulkOutcome::Failed
        );
    }

    #[test]
    fn test_item_failures_details() {
        let resp = response(true, vec![item("delete", 404, Some("index_not_found_exception"))]);
        let failures = item_failures(&resp).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].op, "delete");
        assert_eq!(failures[0].id.as_deref(), Some("id_1"));
        assert_eq!(failures[0].status, Some(404));
        assert_eq!(failures[0].reason.as_deref(), Some("because"));
        assert!(failures[0].ignorable);
    }

    #[test]
    fn test_action_lines() {
        let upsert = BulkAction::Index {
            index: "test".into(),
            id: "id_1".into(),
            version: 42,
            body: json!({"id": 1}),
        };
        let delete = BulkAction::Delete {
            index: "test".into(),
            id: "id_2".into(),
        };
        let ndjson = to_ndjson(&[upsert, delete]).unwrap();
        let lines: Vec<Value> = ndjson
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["index"]["version_type"], "external_gte");
        assert_eq!(lines[0]["index"]["version"], 42);
        assert_eq!(lines[1]["id"], 1);
        assert_eq!(lines[2]["delete"]["_id"], "id_2");
        assert!(lines[2]["delete"].get("version").is_none());
        assert!(ndjson.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_writer_against_memory_index() {
        let index = Arc::new(MemoryIndex::new());
        let writer = BulkWriter::new(index.clone());

        let doc = |version| Document::Upsert {
            cursor: KeyCursor::new(1),
            index: "test".to_string(),
            id: "id_1".to_string(),
            version,
            body: json!({"v": version}),
        };

        let report = writer.write(&[doc(20)]).await.unwrap();
        assert_eq!(report.outcome, BulkOutcome::AllAccepted);

        let report = writer.write(&[doc(10)]).await.unwrap();
        assert_eq!(report.outcome, BulkOutcome::PartiallyIgnorable);
        assert_eq!(report.failures[0].status, Some(409));

        let stored = index.get("test", "id_1").await.unwrap();
        assert_eq!(stored.version, 20);
    }

    #[tokio::test]
    async fn test_writer_empty_batch() {
        let writer = BulkWriter::new(Arc::new(MemoryIndex::new()));
        let report = writer.write::<KeyCursor>(&[]).await.unwrap();
        assert_eq!(report.outcome, BulkOutcome::AllAccepted);
    }
}
