// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search index client.
//!
//! [`SearchClient`] is the narrow surface the crate needs from the index:
//! one bulk endpoint plus update/delete-by-query for the delete cleanup.
//!
//! - [`HttpSearchClient`]: Elasticsearch-compatible REST API over `reqwest`
//! - [`MemoryIndex`]: in-process index with `external_gte` version checks

use crate::bulk::{to_ndjson, BulkAction};
use crate::config::SearchConfig;
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Requests the engine issues against the search index.
pub trait SearchClient: Send + Sync {
    /// Submit a bulk request with `refresh=wait_for` and return the raw response.
    fn bulk<'a>(&'a self, actions: &'a [BulkAction]) -> BoxFuture<'a, Value>;

    /// Set `field` to `value` on the documents with the given ids (`refresh=true`).
    fn update_by_query<'a>(
        &'a self,
        index: &'a str,
        ids: &'a [String],
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Value>;

    /// Delete the documents with the given ids (`refresh=true`).
    fn delete_by_query<'a>(&'a self, index: &'a str, ids: &'a [String]) -> BoxFuture<'a, Value>;
}

fn ids_query(ids: &[String]) -> Value {
    json!({
        "bool": {
            "filter": [
                { "ids": { "values": ids } }
            ]
        }
    })
}

// =============================================================================
// HTTP client
// =============================================================================

/// Elasticsearch-compatible REST client. Hosts are used round-robin.
pub struct HttpSearchClient {
    client: Client,
    config: SearchConfig,
    host_index: AtomicUsize,
}

impl HttpSearchClient {
    pub fn new(config: SearchConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(SyncError::Config("search.hosts must list at least one host".into()));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout_duration())
            .timeout(config.request_timeout_duration())
            .build()
            .map_err(|e| SyncError::search("Failed to create client", e))?;

        Ok(Self {
            client,
            config,
            host_index: AtomicUsize::new(0),
        })
    }

    fn get_host(&self) -> &str {
        let idx = self.host_index.fetch_add(1, Ordering::Relaxed) % self.config.hosts.len();
        self.config.hosts[idx].trim_end_matches('/')
    }

    fn build_request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.get_host(), path);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("ApiKey {}", api_key));
        } else if let (Some(ref user), Some(ref pass)) = (&self.config.username, &self.config.password) {
            req = req.basic_auth(user, Some(pass));
        }

        req
    }

    async fn send(&self, what: &str, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::search(format!("{} request failed", what), e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(512).collect();
            return Err(SyncError::search_status(
                format!("{} failed: {} {}", what, status, snippet),
                status.as_u16(),
            ));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| SyncError::search(format!("Failed to parse {} response", what), e))
    }

    async fn post_bulk(&self, actions: &[BulkAction]) -> Result<Value> {
        let body = to_ndjson(actions)?;
        trace!(bytes = body.len(), actions = actions.len(), "Sending bulk request");

        let req = self
            .build_request("/_bulk?refresh=wait_for")
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        self.send("Bulk", req).await
    }

    async fn post_update_by_query(
        &self,
        index: &str,
        ids: &[String],
        field: &str,
        value: &str,
    ) -> Result<Value> {
        let body = json!({
            "query": ids_query(ids),
            "script": {
                "source": "ctx._source[params.field] = params.value",
                "lang": "painless",
                "params": { "field": field, "value": value }
            }
        });
        debug!(index = %index, ids = ids.len(), "Update by query");
        let req = self
            .build_request(&format!("/{}/_update_by_query?refresh=true", index))
            .json(&body);
        self.send("Update-by-query", req).await
    }

    async fn post_delete_by_query(&self, index: &str, ids: &[String]) -> Result<Value> {
        let body = json!({ "query": ids_query(ids) });
        debug!(index = %index, ids = ids.len(), "Delete by query");
        let req = self
            .build_request(&format!("/{}/_delete_by_query?refresh=true", index))
            .json(&body);
        self.send("Delete-by-query", req).await
    }
}

impl SearchClient for HttpSearchClient {
    fn bulk<'a>(&'a self, actions: &'a [BulkAction]) -> BoxFuture<'a, Value> {
        Box::pin(self.post_bulk(actions))
    }

    fn update_by_query<'a>(
        &'a self,
        index: &'a str,
        ids: &'a [String],
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Value> {
        Box::pin(self.post_update_by_query(index, ids, field, value))
    }

    fn delete_by_query<'a>(&'a self, index: &'a str, ids: &'a [String]) -> BoxFuture<'a, Value> {
        Box::pin(self.post_delete_by_query(index, ids))
    }
}

// =============================================================================
// Memory index (for testing)
// =============================================================================

/// A document held by [`MemoryIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub version: u64,
    pub source: Value,
}

type IndexMap = HashMap<String, HashMap<String, StoredDocument>>;

/// In-process index answering bulk requests the way the real one does.
///
/// Index actions with a lower version than the stored one get a 409
/// `version_conflict_engine_exception`. In strict mode, actions against an
/// index that was never created get a 404 `index_not_found_exception`.
pub struct MemoryIndex {
    indices: RwLock<IndexMap>,
    auto_create: bool,
    rejections: RwLock<HashMap<String, String>>,
    by_query_calls: RwLock<Vec<(String, Vec<String>)>>,
    bulk_requests: AtomicUsize,
    fail_requests: AtomicBool,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    /// Index that creates missing indices on first write.
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            auto_create: true,
            rejections: RwLock::new(HashMap::new()),
            by_query_calls: RwLock::new(Vec::new()),
            bulk_requests: AtomicUsize::new(0),
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Index that only accepts writes to indices created with [`create_index`](Self::create_index).
    pub fn strict() -> Self {
        Self {
            auto_create: false,
            ..Self::new()
        }
    }

    pub async fn create_index(&self, index: &str) {
        self.indices
            .write()
            .await
            .entry(index.to_string())
            .or_default();
    }

    /// Answer every action on `doc_id` with a hard failure of `error_type`.
    pub async fn reject_document(&self, doc_id: &str, error_type: &str) {
        self.rejections
            .write()
            .await
            .insert(doc_id.to_string(), error_type.to_string());
    }

    pub async fn clear_rejections(&self) {
        self.rejections.write().await.clear();
    }

    /// Make every request fail at the transport level.
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, index: &str, id: &str) -> Option<StoredDocument> {
        self.indices.read().await.get(index)?.get(id).cloned()
    }

    pub async fn doc_count(&self, index: &str) -> usize {
        self.indices.read().await.get(index).map_or(0, HashMap::len)
    }

    /// Number of bulk requests received.
    pub fn bulk_requests(&self) -> usize {
        self.bulk_requests.load(Ordering::SeqCst)
    }

    /// `(operation, ids)` of every by-query request, oldest first.
    pub async fn by_query_calls(&self) -> Vec<(String, Vec<String>)> {
        self.by_query_calls.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(SyncError::search_status("injected failure", 503));
        }
        Ok(())
    }

    async fn apply_bulk(&self, actions: &[BulkAction]) -> Result<Value> {
        self.check_available()?;
        self.bulk_requests.fetch_add(1, Ordering::SeqCst);

        let rejections = self.rejections.read().await;
        let mut indices = self.indices.write().await;
        let mut errors = false;
        let mut items = Vec::with_capacity(actions.len());

        for action in actions {
            let (index, id) = (action.index(), action.id());
            let result = if let Some(error_type) = rejections.get(id) {
                item_error(index, id, 400, error_type)
            } else if !self.auto_create && !indices.contains_key(index) {
                item_error(index, id, 404, "index_not_found_exception")
            } else {
                let docs = indices.entry(index.to_string()).or_default();
                match action {
                    BulkAction::Index { version, body, .. } => match docs.get(id).map(|d| d.version) {
                        Some(stored) if *version < stored => {
                            item_error(index, id, 409, "version_conflict_engine_exception")
                        }
                        existing => {
                            let (status, outcome) = if existing.is_some() {
                                (200, "updated")
                            } else {
                                (201, "created")
                            };
                            docs.insert(
                                id.to_string(),
                                StoredDocument {
                                    version: *version,
                                    source: body.clone(),
                                },
                            );
                            item_ok(index, id, status, outcome)
                        }
                    },
                    BulkAction::Delete { .. } => match docs.remove(id) {
                        Some(_) => item_ok(index, id, 200, "deleted"),
                        None => item_ok(index, id, 404, "not_found"),
                    },
                }
            };

            errors |= result.get("error").is_some();
            let mut entry = serde_json::Map::new();
            entry.insert(action.op().to_string(), result);
            items.push(Value::Object(entry));
        }

        Ok(json!({ "took": 0, "errors": errors, "items": items }))
    }

    async fn apply_by_query(
        &self,
        operation: &str,
        index: &str,
        ids: &[String],
        tag: Option<(&str, &str)>,
    ) -> Result<Value> {
        self.check_available()?;
        self.by_query_calls
            .write()
            .await
            .push((operation.to_string(), ids.to_vec()));

        let mut indices = self.indices.write().await;
        let docs = match indices.get_mut(index) {
            Some(docs) => docs,
            None if self.auto_create => return Ok(json!({ "total": 0 })),
            None => {
                return Err(SyncError::search_status(
                    format!("{} failed: no such index [{}]", operation, index),
                    404,
                ))
            }
        };

        let mut touched = 0u64;
        for id in ids {
            match tag {
                Some((field, value)) => {
                    if let Some(doc) = docs.get_mut(id) {
                        if let Value::Object(source) = &mut doc.source {
                            source.insert(field.to_string(), Value::String(value.to_string()));
                        }
                        touched += 1;
                    }
                }
                None => {
                    if docs.remove(id).is_some() {
                        touched += 1;
                    }
                }
            }
        }

        let key = if tag.is_some() { "updated" } else { "deleted" };
        let mut resp = json!({ "total": touched });
        resp[key] = json!(touched);
        Ok(resp)
    }
}

fn item_ok(index: &str, id: &str, status: u16, result: &str) -> Value {
    json!({ "_index": index, "_id": id, "status": status, "result": result })
}

fn item_error(index: &str, id: &str, status: u16, error_type: &str) -> Value {
    json!({
        "_index": index,
        "_id": id,
        "status": status,
        "error": { "type": error_type, "reason": format!("[{}] rejected: {}", id, error_type) }
    })
}

impl SearchClient for MemoryIndex {
    fn bulk<'a>(&'a self, actions: &'a [BulkAction]) -> BoxFuture<'a, Value> {
        Box::pin(self.apply_bulk(actions))
    }

    fn update_by_query<'a>(
        &'a self,
        index: &'a str,
        ids: &'a [String],
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Value> {
        Box::pin(self.apply_by_query("update_by_query", index, ids, Some((field, value))))
    }

    fn delete_by_query<'a>(&'a self, index: &'a str, ids: &'a [String]) -> BoxFuture<'a, Value> {
        Box::pin(self.apply_by_query("delete_by_query", index, ids, None))
    }
}
