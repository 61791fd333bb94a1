// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite checkpoint backend.
//!
//! Stores the position as a single row keyed by checkpoint name, so several
//! indexers can share one database file.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Writes retry with exponential backoff (5 attempts, 10ms
//! doubling up to 500ms) before the error is reported to the replicator,
//! which logs it and tries again on the next apply.
//!
//! # Durability
//!
//! WAL mode with `synchronous = NORMAL` can lose the most recent commits on
//! power loss (not on a process crash). The checkpoint then reads back an
//! older position and the events after it are applied again, which the
//! index absorbs because every write is idempotent.

use super::{parse_stored, CheckpointResult, PositionStore};
use crate::error::CheckpointError;
use crate::metrics;
use crate::position::LogPosition;
use crate::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                metrics::record_checkpoint_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Checkpoint stored in a SQLite table.
pub struct SqliteCheckpoint {
    pool: SqlitePool,
    /// Row key
    name: String,
    path: String,
}

impl SqliteCheckpoint {
    /// Open (or create) the database at `path` and use row `name`.
    pub async fn open(path: impl AsRef<Path>, name: &str) -> CheckpointResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, name, "Opening SQLite checkpoint");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // Single writer
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                name TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            name: name.to_string(),
            path: path_str,
        })
    }

    /// Database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PositionStore for SqliteCheckpoint {
    fn probe(&self) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, CheckpointResult<Option<LogPosition>>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT position FROM checkpoints WHERE name = ?")
                    .bind(&self.name)
                    .fetch_optional(&self.pool)
                    .await?;

            match row {
                Some((position,)) => parse_stored(&position),
                None => Ok(None),
            }
        })
    }

    fn save(&self, position: LogPosition) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            let now = chrono::Utc::now().timestamp_millis();
            let value = position.to_string();
            let (pool, name, value) = (&self.pool, self.name.as_str(), value.as_str());

            execute_with_retry("checkpoint_save", || async move {
                sqlx::query(
                    r#"
                    INSERT INTO checkpoints (name, position, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(name) DO UPDATE SET
                        position = excluded.position,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(name)
                .bind(value)
                .bind(now)
                .execute(pool)
                .await
            })
            .await
            .map_err(CheckpointError::from)?;

            debug!(position = %position, "Checkpoint saved");
            Ok(())
        })
    }

    /// Checkpoint the WAL and close the pool.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let pool = &self.pool;
            let result = execute_with_retry("checkpoint_wal", || async move {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                    .execute(pool)
                    .await
            })
            .await;

            if let Err(e) = result {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
            self.pool.close().await;
            info!("SQLite checkpoint closed");
        })
    }
}
