// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint persistence.
//!
//! The checkpoint is a single slot holding the last successfully applied
//! [`LogPosition`]. It is overwritten on every save and never keeps history.
//!
//! ## Semantics
//!
//! ```text
//! read event 1234 → apply to index → save checkpoint 1234
//!                   (crash here = re-read 1234, idempotent)
//! ```
//!
//! On restart we resume strictly after the stored position. A missing or
//! unparsable checkpoint is not fatal: the caller anchors at "now".
//!
//! ## Backends
//!
//! - [`FileCheckpoint`]: one text file, overwritten atomically (default)
//! - [`SqliteCheckpoint`]: one row in a SQLite table, WAL mode

mod file;
mod sqlite;

pub use file::FileCheckpoint;
pub use sqlite::SqliteCheckpoint;

use crate::config::{CheckpointBackend, CheckpointConfig};
use crate::error::CheckpointError;
use crate::position::LogPosition;
use crate::BoxFuture;

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Durable storage for the replicator's position.
///
/// Only the replicator writes through this trait; it is the single owner of
/// the position value.
pub trait PositionStore: Send + Sync + 'static {
    /// Check that the backing storage is usable at all.
    ///
    /// Called once at startup. An error here is fatal.
    fn probe(&self) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Load the stored position.
    ///
    /// `Ok(None)` means no checkpoint exists yet. Unparsable content is
    /// reported as [`CheckpointError::Malformed`].
    fn load(&self) -> BoxFuture<'_, CheckpointResult<Option<LogPosition>>>;

    /// Overwrite the stored position.
    fn save(&self, position: LogPosition) -> BoxFuture<'_, CheckpointResult<()>>;

    /// Release resources (flush WAL, close pools).
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// A checkpoint backend chosen at runtime from configuration.
pub enum Checkpoint {
    File(FileCheckpoint),
    Sqlite(SqliteCheckpoint),
}

impl Checkpoint {
    /// Open the backend selected by `config`.
    pub async fn open(config: &CheckpointConfig) -> CheckpointResult<Self> {
        match config.backend {
            CheckpointBackend::File => Ok(Checkpoint::File(FileCheckpoint::new(&config.path))),
            CheckpointBackend::Sqlite => {
                Ok(Checkpoint::Sqlite(SqliteCheckpoint::open(&config.path, &config.name).await?))
            }
        }
    }
}

impl PositionStore for Checkpoint {
    fn probe(&self) -> BoxFuture<'_, CheckpointResult<()>> {
        match self {
            Checkpoint::File(store) => store.probe(),
            Checkpoint::Sqlite(store) => store.probe(),
        }
    }

    fn load(&self) -> BoxFuture<'_, CheckpointResult<Option<LogPosition>>> {
        match self {
            Checkpoint::File(store) => store.load(),
            Checkpoint::Sqlite(store) => store.load(),
        }
    }

    fn save(&self, position: LogPosition) -> BoxFuture<'_, CheckpointResult<()>> {
        match self {
            Checkpoint::File(store) => store.save(position),
            Checkpoint::Sqlite(store) => store.save(position),
        }
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        match self {
            Checkpoint::File(store) => store.close(),
            Checkpoint::Sqlite(store) => store.close(),
        }
    }
}

/// Parse stored checkpoint text.
fn parse_stored(content: &str) -> CheckpointResult<Option<LogPosition>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| CheckpointError::Malformed {
            content: trimmed.to_string(),
        })
}
