// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Stream replication log.
//!
//! Each stream entry is one log record. The entry ID (`<ms>-<seq>`) is the
//! [`LogPosition`]; the fields are:
//!
//! | Field | Required | Meaning |
//! |-------|----------|---------|
//! | `op` | yes | `i`/`u`/`d` (or `insert`/`update`/`delete`) |
//! | `ns` | yes | Namespace, `"<db>.<collection>"` |
//! | `id` | one of | Document ID |
//! | `o2_id` | one of | Alternate document ID (delete-shaped records) |
//!
//! # Tailing
//!
//! Polls issue `XREAD BLOCK <idle_timeout> COUNT <batch> STREAMS <key> <last>`.
//! An empty reply means the block timed out with the connection still
//! healthy. The read is also wrapped in a client-side timeout slightly
//! longer than the block, so a silently dead connection is reported as
//! disconnected instead of hanging.
//!
//! # Stream Trimming
//!
//! Streams can be trimmed via `MAXLEN` or `MINID`. If the position we open
//! from is older than the oldest retained entry, events may have been lost.
//! `open` logs a warning and emits a metric; reading still resumes after
//! the requested position, which yields every retained entry.

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::event::{ChangeEvent, LogRecord};
use crate::metrics;
use crate::position::LogPosition;
use crate::source::{ChangeSource, PollOutcome};
use crate::BoxFuture;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Extra client-side wait on top of the XREAD block timeout.
const READ_GRACE: Duration = Duration::from_secs(2);

/// `BLOCK 0` waits forever, so the block is never shorter than this.
const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(1);

/// Replication log backed by a Redis Stream.
pub struct RedisChangeSource {
    client: redis::Client,
    stream_key: String,
    idle_timeout: Duration,
    batch_size: usize,
    connect_timeout: Duration,
}

/// An open tailing session.
pub struct RedisSession {
    conn: ConnectionManager,
    /// Last entry ID handed to XREAD (exclusive lower bound).
    last_read: LogPosition,
    /// Decoded events not yet returned by `poll`.
    buffer: VecDeque<ChangeEvent>,
}

impl RedisSession {
    /// Position the next XREAD starts after.
    pub fn last_read(&self) -> LogPosition {
        self.last_read
    }
}

impl RedisChangeSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| SourceError::redis("open", e))?;

        Ok(Self {
            client,
            stream_key: config.stream_key.clone(),
            idle_timeout: config.idle_timeout_duration().max(MIN_IDLE_TIMEOUT),
            batch_size: config.batch_size.max(1),
            connect_timeout: config.connect_timeout_duration(),
        })
    }

    /// Stream key being tailed.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn connect(&self) -> Result<ConnectionManager, SourceError> {
        let mut conn = timeout(self.connect_timeout, self.client.get_connection_manager())
            .await
            .map_err(|_| {
                SourceError::unavailable(
                    "connect",
                    format!("timed out after {:?}", self.connect_timeout),
                )
            })?
            .map_err(|e| SourceError::redis("connect", e))?;

        let _: String = timeout(self.connect_timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| SourceError::unavailable("PING", "timed out"))?
            .map_err(|e| SourceError::redis("PING", e))?;

        Ok(conn)
    }

    /// Oldest entry ID in the stream, if any.
    async fn oldest_position(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<Option<LogPosition>, SourceError> {
        // XRANGE key - + COUNT 1 returns the oldest entry
        let query = async {
            let entries: Vec<(String, HashMap<String, redis::Value>)> = redis::cmd("XRANGE")
                .arg(&self.stream_key)
                .arg("-")
                .arg("+")
                .arg("COUNT")
                .arg(1)
                .query_async(conn)
                .await?;
            Ok::<_, redis::RedisError>(entries)
        };
        let result = timeout(self.connect_timeout, query)
            .await
            .map_err(|_| SourceError::unavailable("XRANGE", "timed out"))?
            .map_err(|e| SourceError::redis("XRANGE", e))?;

        Ok(result.first().and_then(|(id, _)| id.parse().ok()))
    }

    /// Warn if the stream no longer holds the entries right after `after`.
    async fn check_trimmed(
        &self,
        conn: &mut ConnectionManager,
        after: LogPosition,
    ) -> Result<(), SourceError> {
        if after == LogPosition::ZERO {
            return Ok(());
        }
        if let Some(oldest) = self.oldest_position(conn).await? {
            if oldest > after {
                warn!(
                    stream = %self.stream_key,
                    checkpoint = %after,
                    oldest = %oldest,
                    "Stream was trimmed past our checkpoint - potential data gap!"
                );
                metrics::record_stream_trimmed();
            }
        }
        Ok(())
    }

    async fn open_session(&self, after: LogPosition) -> Result<RedisSession, SourceError> {
        let mut conn = self.connect().await?;
        self.check_trimmed(&mut conn, after).await?;

        info!(stream = %self.stream_key, after = %after, "Tailing replication log");
        Ok(RedisSession {
            conn,
            last_read: after,
            buffer: VecDeque::new(),
        })
    }

    async fn poll_session(&self, session: &mut RedisSession) -> PollOutcome {
        loop {
            if let Some(event) = session.buffer.pop_front() {
                return PollOutcome::Event(event);
            }

            let opts = StreamReadOptions::default()
                .block(usize::try_from(self.idle_timeout.as_millis()).unwrap_or(usize::MAX))
                .count(self.batch_size);
            let cursor = session.last_read.to_string();

            let read_start = Instant::now();
            let read = timeout(
                self.idle_timeout + READ_GRACE,
                session
                    .conn
                    .xread_options(&[self.stream_key.as_str()], &[cursor.as_str()], &opts),
            )
            .await;
            metrics::record_poll_latency(read_start.elapsed());

            let reply: StreamReadReply = match read {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    return PollOutcome::Disconnected {
                        reason: format!("XREAD failed: {}", e),
                    }
                }
                Err(_) => {
                    return PollOutcome::Disconnected {
                        reason: format!(
                            "XREAD did not return within {:?}",
                            self.idle_timeout + READ_GRACE
                        ),
                    }
                }
            };

            let mut entries_read = 0usize;
            for stream in reply.keys {
                for entry in stream.ids {
                    entries_read += 1;
                    self.buffer_entry(session, &entry.id, &entry.map);
                }
            }

            if entries_read == 0 {
                return PollOutcome::Empty { recoverable: true };
            }
            // Every entry in the batch was skipped; read the next batch
        }
    }

    fn buffer_entry(
        &self,
        session: &mut RedisSession,
        id: &str,
        fields: &HashMap<String, redis::Value>,
    ) {
        let position: LogPosition = match id.parse() {
            Ok(p) => p,
            Err(e) => {
                warn!(stream = %self.stream_key, entry_id = %id, error = %e, "Unparsable entry ID, skipping");
                metrics::record_parse_error();
                return;
            }
        };

        if position <= session.last_read {
            warn!(
                entry_id = %id,
                last_read = %session.last_read,
                "Out-of-order stream entry, skipping"
            );
            return;
        }
        session.last_read = position;

        match decode_entry(fields).into_event(position) {
            Ok(event) => {
                trace!(
                    position = %event.position,
                    namespace = %event.namespace,
                    op = %event.kind(),
                    document_id = %event.document_id(),
                    "Decoded log record"
                );
                session.buffer.push_back(event);
            }
            Err(e) => {
                warn!(
                    stream = %self.stream_key,
                    entry_id = %id,
                    error = %e,
                    "Failed to decode log record, skipping"
                );
                metrics::record_parse_error();
            }
        }
    }
}

impl ChangeSource for RedisChangeSource {
    type Session = RedisSession;

    fn open(&self, after: LogPosition) -> BoxFuture<'_, Result<RedisSession, SourceError>> {
        Box::pin(self.open_session(after))
    }

    fn poll<'a>(&'a self, session: &'a mut RedisSession) -> BoxFuture<'a, PollOutcome> {
        Box::pin(async move {
            let outcome = self.poll_session(session).await;
            if let PollOutcome::Empty { .. } = outcome {
                debug!(stream = %self.stream_key, "No new changes");
            }
            outcome
        })
    }
}

/// Pull the known fields out of a stream entry.
fn decode_entry(fields: &HashMap<String, redis::Value>) -> LogRecord {
    LogRecord {
        op: get_string_field(fields, "op"),
        namespace: get_string_field(fields, "ns"),
        document_id: get_string_field(fields, "id"),
        alternate_id: get_string_field(fields, "o2_id"),
    }
}

/// Extract a string field from a stream entry.
fn get_string_field(fields: &HashMap<String, redis::Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}
