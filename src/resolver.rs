// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source-of-truth document lookup.
//!
//! Upserts carry no body in the log. At apply time the sink asks a
//! [`DocumentResolver`] for the document's current content, so the index
//! always receives the latest version even if the log is replayed.

use crate::error::ResolveError;
use crate::event::Namespace;
use crate::BoxFuture;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::debug;

/// Lookup timeout when none is configured.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the current content of a document.
pub trait DocumentResolver: Send + Sync {
    /// `Ok(None)` means the document no longer exists.
    fn fetch<'a>(
        &'a self,
        namespace: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>, ResolveError>>;
}

/// Documents stored as JSON strings under `<prefix><namespace>:<id>`.
pub struct RedisDocumentResolver {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    prefix: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RedisDocumentResolver {
    pub fn new(
        redis_url: &str,
        prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let client = redis::Client::open(redis_url).map_err(|e| ResolveError::Store {
            operation: "open".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            prefix: prefix.into(),
            connect_timeout,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Bound each `GET`. A lookup that exceeds it fails the apply, which the
    /// replicator recovers from.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Key holding a document.
    pub fn key_for(&self, namespace: &Namespace, id: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace, id)
    }

    /// Connect on first use. The manager reconnects by itself afterwards.
    async fn connection(&self) -> Result<ConnectionManager, ResolveError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                timeout(self.connect_timeout, self.client.get_connection_manager())
                    .await
                    .map_err(|_| ResolveError::Store {
                        operation: "connect".to_string(),
                        message: format!("timed out after {:?}", self.connect_timeout),
                    })?
                    .map_err(|e| ResolveError::Store {
                        operation: "connect".to_string(),
                        message: e.to_string(),
                    })
            })
            .await?;
        Ok(conn.clone())
    }

    async fn get(&self, namespace: &Namespace, id: &str) -> Result<Option<Value>, ResolveError> {
        let key = self.key_for(namespace, id);
        let mut conn = self.connection().await?;

        let query = async {
            let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(raw)
        };
        let raw = timeout(self.read_timeout, query)
            .await
            .map_err(|_| ResolveError::Store {
                operation: "GET".to_string(),
                message: format!("timed out after {:?}", self.read_timeout),
            })?
            .map_err(|e| ResolveError::Store {
                operation: "GET".to_string(),
                message: e.to_string(),
            })?;

        let Some(raw) = raw else {
            debug!(key = %key, "Document not found");
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ResolveError::Decode {
                id: id.to_string(),
                message: e.to_string(),
            })
    }
}

impl DocumentResolver for RedisDocumentResolver {
    fn fetch<'a>(
        &'a self,
        namespace: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>, ResolveError>> {
        Box::pin(self.get(namespace, id))
    }
}
