// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the change indexer.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON. Durations are humantime strings (`"5s"`, `"250ms"`, `"5m"`).
//!
//! # Configuration Structure
//!
//! ```text
//! IndexerConfig
//! ├── source: SourceConfig          # Redis Stream replication log
//! ├── index: IndexConfig            # HTTP search index
//! ├── checkpoint: CheckpointConfig  # Position persistence
//! └── replicator: ReplicatorSettings # Backoff and idle pacing
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! source:
//!   redis_url: "redis://127.0.0.1:6379"
//!   stream_key: "oplog"
//!   idle_timeout: "5s"
//!
//! index:
//!   url: "http://localhost:9200"
//!
//! checkpoint:
//!   backend: file
//!   path: "./logs/pos"
//!
//! replicator:
//!   reconnect_backoff: "1s"
//! ```

use crate::error::{IndexerError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub replicator: ReplicatorSettings,
}

impl IndexerConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| IndexerError::Config(format!("Invalid YAML config: {}", e)))
    }

    /// Reject configurations the replicator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.source.redis_url.trim().is_empty() {
            return Err(IndexerError::Config("source.redis_url is empty".to_string()));
        }
        if self.source.stream_key.is_empty() {
            return Err(IndexerError::Config("source.stream_key is empty".to_string()));
        }
        if self.source.batch_size == 0 {
            return Err(IndexerError::Config("source.batch_size must be > 0".to_string()));
        }
        url::Url::parse(&self.index.url)
            .map_err(|e| IndexerError::Config(format!("index.url is invalid: {}", e)))?;
        if !crate::sink::is_path_segment(&self.index.doc_type) {
            return Err(IndexerError::Config(format!(
                "index.doc_type {:?} is not a usable path segment",
                self.index.doc_type
            )));
        }
        if self.checkpoint.path.trim().is_empty() {
            return Err(IndexerError::Config("checkpoint.path is empty".to_string()));
        }
        if self.checkpoint.every == 0 {
            return Err(IndexerError::Config("checkpoint.every must be > 0".to_string()));
        }
        if self.replicator.backoff_factor < 1.0 {
            return Err(IndexerError::Config(
                "replicator.backoff_factor must be >= 1.0".to_string(),
            ));
        }
        for (name, value, allow_zero) in [
            ("source.idle_timeout", &self.source.idle_timeout, false),
            ("source.connect_timeout", &self.source.connect_timeout, false),
            ("source.read_timeout", &self.source.read_timeout, false),
            ("index.request_timeout", &self.index.request_timeout, false),
            ("replicator.reconnect_backoff", &self.replicator.reconnect_backoff, true),
            ("replicator.max_backoff", &self.replicator.max_backoff, true),
            ("replicator.idle_delay", &self.replicator.idle_delay, true),
        ] {
            let duration = humantime::parse_duration(value)
                .map_err(|e| IndexerError::Config(format!("{name} {value:?}: {e}")))?;
            if duration.is_zero() && !allow_zero {
                return Err(IndexerError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SourceConfig: replication log
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication log (Redis Stream) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Redis URL, e.g. `"redis://127.0.0.1:6379"`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Stream key holding the log.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Key prefix for current documents (`<prefix><ns>:<id>`).
    #[serde(default)]
    pub document_prefix: String,

    /// How long one XREAD may block waiting for new entries.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// Maximum entries fetched per XREAD.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout for establishing the connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Timeout for one document lookup.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream_key() -> String {
    "oplog".to_string()
}

fn default_idle_timeout() -> String {
    "5s".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_read_timeout() -> String {
    "5s".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            stream_key: default_stream_key(),
            document_prefix: String::new(),
            idle_timeout: default_idle_timeout(),
            batch_size: default_batch_size(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl SourceConfig {
    pub fn idle_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.idle_timeout, Duration::from_secs(5))
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.connect_timeout, Duration::from_secs(5))
    }

    pub fn read_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.read_timeout, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IndexConfig: search index
// ═══════════════════════════════════════════════════════════════════════════════

/// Search index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the index.
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Path segment between namespace and document ID.
    #[serde(default = "default_doc_type")]
    pub doc_type: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_doc_type() -> String {
    "default".to_string()
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            doc_type: default_doc_type(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl IndexConfig {
    pub fn request_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.request_timeout, Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the checkpoint lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    File,
    Sqlite,
}

/// Checkpoint persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// File path (file backend) or database path (sqlite backend).
    #[serde(default = "default_checkpoint_path")]
    pub path: String,

    /// Row name in the sqlite backend.
    #[serde(default = "default_checkpoint_name")]
    pub name: String,

    /// Save after this many applied events. Pending progress is also saved
    /// on idle polls and on shutdown.
    #[serde(default = "default_checkpoint_every")]
    pub every: u32,
}

fn default_checkpoint_path() -> String {
    "./logs/pos".to_string()
}

fn default_checkpoint_name() -> String {
    "default".to_string()
}

fn default_checkpoint_every() -> u32 {
    1
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::File,
            path: default_checkpoint_path(),
            name: default_checkpoint_name(),
            every: default_checkpoint_every(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicatorSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Pacing of the replication loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorSettings {
    /// Wait before reconnecting after a failure.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: String,

    /// Growth factor per consecutive failure. 1.0 keeps the backoff fixed.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for the reconnect backoff.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,

    /// Pause after an idle (empty) poll.
    #[serde(default = "default_idle_delay")]
    pub idle_delay: String,
}

fn default_reconnect_backoff() -> String {
    "1s".to_string()
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_backoff() -> String {
    "5m".to_string()
}

fn default_idle_delay() -> String {
    "1s".to_string()
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: default_reconnect_backoff(),
            backoff_factor: default_backoff_factor(),
            max_backoff: default_max_backoff(),
            idle_delay: default_idle_delay(),
        }
    }
}

impl ReplicatorSettings {
    pub fn idle_delay_duration(&self) -> Duration {
        parse_duration_or(&self.idle_delay, Duration::from_secs(1))
    }

    /// Reconnect policy derived from these settings. Retries never stop.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: parse_duration_or(&self.reconnect_backoff, Duration::from_secs(1)),
            max_delay: parse_duration_or(&self.max_backoff, Duration::from_secs(300)),
            backoff_factor: self.backoff_factor,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
