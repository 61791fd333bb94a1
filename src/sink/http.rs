// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP search index (`PUT`/`DELETE <base>/<namespace>/<doc_type>/<id>`).

use super::{DocumentAddress, SearchIndex};
use crate::config::IndexConfig;
use crate::error::{IndexerError, Result, SinkError};
use crate::BoxFuture;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Longest slice of an error response body kept in the error message.
const BODY_SNIPPET_LEN: usize = 512;

/// Search index reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIndex {
    client: Client,
    base: Url,
}

impl HttpIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        Self::with_timeout(&config.url, config.request_timeout_duration())
    }

    /// Build a client for `base_url` where every request gives up after
    /// `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| IndexerError::Config(format!("Invalid index URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(IndexerError::Config(format!(
                "Index URL {base_url:?} cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("change-indexer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IndexerError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base })
    }

    /// Full URL for a document. Each address part is one encoded segment.
    pub fn url_for(&self, address: &DocumentAddress) -> std::result::Result<Url, SinkError> {
        if !address.is_addressable() {
            return Err(SinkError::Unaddressable {
                address: address.to_string(),
            });
        }
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(address.segments());
        }
        Ok(url)
    }

    async fn put(&self, address: &DocumentAddress, body: &Value) -> std::result::Result<(), SinkError> {
        let url = self.url_for(address)?;
        debug!(url = %url, "PUT document");

        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(address, e))?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(status_error(address, response).await)
    }

    async fn remove(&self, address: &DocumentAddress) -> std::result::Result<bool, SinkError> {
        let url = self.url_for(address)?;
        debug!(url = %url, "DELETE document");

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| request_error(address, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status.is_success() {
            return Ok(true);
        }
        Err(status_error(address, response).await)
    }
}

impl SearchIndex for HttpIndex {
    fn replace<'a>(
        &'a self,
        address: &'a DocumentAddress,
        body: &'a Value,
    ) -> BoxFuture<'a, std::result::Result<(), SinkError>> {
        Box::pin(self.put(address, body))
    }

    fn delete<'a>(
        &'a self,
        address: &'a DocumentAddress,
    ) -> BoxFuture<'a, std::result::Result<bool, SinkError>> {
        Box::pin(self.remove(address))
    }
}

fn request_error(address: &DocumentAddress, e: reqwest::Error) -> SinkError {
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        e.to_string()
    };
    SinkError::Index {
        address: address.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

async fn status_error(address: &DocumentAddress, response: Response) -> SinkError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SinkError::Index {
        address: address.to_string(),
        status: Some(status.as_u16()),
        message: snippet(&body),
    }
}

fn snippet(body: &str) -> String {
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
