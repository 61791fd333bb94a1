// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication log access.
//!
//! A [`ChangeSource`] presents the log as an ordered sequence of
//! [`ChangeEvent`]s starting strictly after a given position. Each poll
//! reports one of three outcomes:
//!
//! | Outcome | Meaning | Caller does |
//! |---------|---------|-------------|
//! | `Event` | A change is available | Apply it |
//! | `Empty { recoverable: true }` | Idle timeout, session still alive | Poll again after a short delay |
//! | `Empty { recoverable: false }` / `Disconnected` | Session unusable | Re-open from the last saved position |
//!
//! Keeping "idle but alive" apart from "dead" avoids both re-querying on
//! every idle tick and hanging forever on a dead session.

mod redis_stream;

pub use redis_stream::{RedisChangeSource, RedisSession};

use crate::error::SourceError;
use crate::event::ChangeEvent;
use crate::position::LogPosition;
use crate::BoxFuture;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new change; the session's read position has advanced past it.
    Event(ChangeEvent),

    /// No new change arrived within the idle timeout.
    ///
    /// `recoverable: true` means the session is still valid.
    Empty { recoverable: bool },

    /// The session can no longer be used and must be re-opened.
    Disconnected { reason: String },
}

impl PollOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Event(_) => "event",
            PollOutcome::Empty { recoverable: true } => "idle",
            PollOutcome::Empty { recoverable: false } => "invalidated",
            PollOutcome::Disconnected { .. } => "disconnected",
        }
    }
}

/// A tailable, ordered replication log.
pub trait ChangeSource: Send + Sync + 'static {
    /// Per-connection read state (connection, read position, buffer).
    type Session: Send;

    /// Start tailing the log strictly after `after`.
    fn open(&self, after: LogPosition) -> BoxFuture<'_, Result<Self::Session, SourceError>>;

    /// Wait (bounded) for the next change.
    fn poll<'a>(&'a self, session: &'a mut Self::Session) -> BoxFuture<'a, PollOutcome>;
}
