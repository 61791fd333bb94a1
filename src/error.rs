// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the change indexer.
//!
//! Each boundary has its own error enum so the replicator can decide what a
//! failure means without string matching:
//!
//! | Error Type | Handling | Description |
//! |------------|----------|-------------|
//! | `SourceError::Unavailable` | Reconnect | Cannot open or read the replication log |
//! | `SourceError::Parse` | Skip record | Malformed log record |
//! | `SinkError::Unaddressable` | Skip event | Document ID has no distinct index path |
//! | `SinkError` (other) | Recover, replay | Document lookup or index write failed |
//! | `CheckpointError::Io` | Retry on next apply | Checkpoint could not be written |
//! | `CheckpointError::Malformed` | Start from now | Stored checkpoint unreadable |
//! | `Config` | Exit | Configuration invalid |
//!
//! Idle timeouts and dead sessions are not errors: they are reported as
//! [`PollOutcome`](crate::source::PollOutcome) variants.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Failure talking to the replication log.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The log could not be reached (connect, PING, range query).
    #[error("Source unavailable ({operation}): {message}")]
    Unavailable {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A log record could not be decoded into a change event.
    #[error("Log record parse error: {0}")]
    Parse(String),
}

impl SourceError {
    /// Create an unavailable error from a `redis::RedisError`.
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an unavailable error without source.
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Failure fetching a document from the source of truth.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Document store error ({operation}): {message}")]
    Store { operation: String, message: String },

    #[error("Document {id} is not valid JSON: {message}")]
    Decode { id: String, message: String },
}

/// Failure applying one change to the index.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Reading the current document failed.
    #[error("Resolve failed: {0}")]
    Resolve(#[from] ResolveError),

    /// The index rejected or failed the write.
    #[error("Index write failed for {address}{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Index {
        address: String,
        status: Option<u16>,
        message: String,
    },

    /// The resolved document cannot be sent as an index body.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A path segment of the address is empty, `.` or `..`, which a URL
    /// path cannot carry as a segment.
    #[error("Document address {address} has no distinct URL path")]
    Unaddressable { address: String },
}

/// Failure loading or saving the checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored value is not a valid position.
    #[error("Checkpoint content is malformed: {content:?}")]
    Malformed { content: String },

    #[error("Checkpoint database error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level error for the indexer.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
