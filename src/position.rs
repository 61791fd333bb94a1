// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log positions.
//!
//! A [`LogPosition`] marks progress through the replication log: a wall-clock
//! component (milliseconds since the Unix epoch) plus an ordinal that orders
//! entries written within the same millisecond. This is exactly the shape of
//! a Redis Stream entry ID, and the text form is the same:
//!
//! ```text
//! 1700000000000-3
//! └─── time ──┘ └ ordinal
//! ```
//!
//! Positions compare numerically, never lexicographically.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Totally ordered marker of progress through the replication log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogPosition {
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    /// Ordinal within `time`.
    pub ordinal: u64,
}

impl LogPosition {
    /// The position before every entry in the log.
    pub const ZERO: LogPosition = LogPosition { time: 0, ordinal: 0 };

    pub const fn new(time: u64, ordinal: u64) -> Self {
        Self { time, ordinal }
    }

    /// Anchor at the current wall-clock time with a zero ordinal.
    ///
    /// Used when no checkpoint exists, so capture starts from "now".
    pub fn now_anchor() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self::new(u64::try_from(now).unwrap_or(0), 0)
    }

    /// Milliseconds between this position and a later one.
    ///
    /// Returns 0 if `later` is not actually later.
    pub fn lag_ms(&self, later: &LogPosition) -> u64 {
        later.time.saturating_sub(self.time)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.time, self.ordinal)
    }
}

/// Error returned when a position string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid log position: {0:?}")]
pub struct ParsePositionError(pub String);

impl FromStr for LogPosition {
    type Err = ParsePositionError;

    /// Accepts `<time>-<ordinal>` or a bare `<time>` (ordinal 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParsePositionError(s.to_string());

        match s.split_once('-') {
            Some((time, ordinal)) => {
                let time = parse_digits(time).ok_or_else(err)?;
                let ordinal = parse_digits(ordinal).ok_or_else(err)?;
                Ok(Self::new(time, ordinal))
            }
            None => {
                let time = parse_digits(s).ok_or_else(err)?;
                Ok(Self::new(time, 0))
            }
        }
    }
}

/// Plain decimal digits only. `u64::from_str` alone would also take `+5`.
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl Serialize for LogPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
