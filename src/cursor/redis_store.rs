// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-backed cursor store.
//!
//! One string entry per stream, keyed by the stream id, holding the cursor
//! JSON. The entry never expires.

use super::CursorStore;
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Default time allowed for the initial connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cursor store backed by a Redis-compatible cache.
///
/// `ConnectionManager` reconnects on its own and is cheap to clone, so each
/// command works on a clone.
pub struct RedisCursorStore {
    conn: ConnectionManager,
    url: String,
}

impl RedisCursorStore {
    /// Connect to the cache at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect, failing if no connection is established within `connect_timeout`.
    pub async fn connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<Self> {
        let display_url = redact_userinfo(url);
        info!(url = %display_url, "Connecting cursor cache");

        let client = Client::open(url)
            .map_err(|e| SyncError::Config(format!("Invalid Redis URL: {}", e)))?;

        let conn = match timeout(connect_timeout, client.get_connection_manager()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(SyncError::redis("CONNECT", e)),
            Err(_) => {
                return Err(SyncError::redis_msg(
                    "CONNECT",
                    format!("timed out after {}ms", connect_timeout.as_millis()),
                ))
            }
        };

        info!(url = %display_url, "Cursor cache connected");
        Ok(Self {
            conn,
            url: display_url,
        })
    }

    /// Cache URL with credentials masked (for diagnostics).
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn read_entry(&self, stream_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(stream_id)
            .await
            .map_err(|e| SyncError::redis("GET", e))?;
        Ok(value)
    }

    async fn write_entry(&self, stream_id: &str, cursor_json: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: String = conn
            .set(stream_id, cursor_json)
            .await
            .map_err(|e| SyncError::redis("SET", e))?;
        debug!(stream_id = %stream_id, reply = %reply, "Cursor entry written");
        Ok(reply == "OK")
    }
}

/// Replace the `user:password` part of a URL with `***`.
fn redact_userinfo(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***{}", &url[..scheme_end], &rest[at..]),
        None => url.to_string(),
    }
}

impl CursorStore for RedisCursorStore {
    fn get<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(self.read_entry(stream_id))
    }

    fn set<'a>(&'a self, stream_id: &'a str, cursor_json: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.write_entry(stream_id, cursor_json))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
