// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconnect backoff.
//!
//! The replicator never gives up on the log or the index: it waits and
//! reconnects, forever, until told to stop. [`RetryConfig`] decides how long
//! each wait is and [`Backoff`] tracks consecutive failures between
//! successes.
//!
//! The default is a fixed interval (`backoff_factor = 1.0`). A larger factor
//! grows the delay per consecutive failure up to `max_delay`.

use std::time::Duration;

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the delay.
    pub max_delay: Duration,

    /// Multiplier per consecutive failure (1.0 = fixed interval).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::daemon()
    }
}

impl RetryConfig {
    /// Fixed interval, retry forever.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            backoff_factor: 1.0,
        }
    }

    /// One second between attempts.
    pub fn daemon() -> Self {
        Self::fixed(Duration::from_secs(1))
    }

    /// Fast retry for tests.
    pub fn testing() -> Self {
        Self::fixed(Duration::from_millis(10))
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_factor.max(1.0).powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.initial_delay);
        }
        Duration::from_secs_f64(delay_secs)
    }
}

/// Tracks consecutive failures and yields the next wait.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: usize,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.config.delay_for_attempt(self.failures)
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
