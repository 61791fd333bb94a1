// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replication loop.
//!
//! A single task moves through five states:
//!
//! ```text
//!             ┌──────────────────────────────────────────┐
//!             ▼                                          │
//!      ┌────────────┐  open ok  ┌───────────┐  event  ┌──────────┐
//!      │ Connecting │──────────►│ Streaming │────────►│ Applying │
//!      └────────────┘           └───────────┘◄────────└──────────┘
//!         ▲     │ fail              │ dead        ok     │ fail
//!         │     ▼                   ▼                    ▼
//!         │  ┌────────────────────────────────────────────────┐
//!         └──│ Recovering (backoff, rewind cursor to saved)   │
//!            └────────────────────────────────────────────────┘
//! ```
//!
//! `Stopped` is entered from any state once shutdown is signalled.
//!
//! # Checkpointing
//!
//! Two positions are tracked. The *cursor* is the last position applied in
//! memory. The *saved* position is the last one persisted. The saved
//! position only ever moves to a cursor value, and only after the apply at
//! that position succeeded, so a crash replays at most the unsaved tail.
//! Replays are harmless because index writes are idempotent.
//!
//! # Graceful Shutdown
//!
//! A pending poll or backoff wait is abandoned as soon as shutdown is
//! signalled. An apply that already started always completes. Unsaved
//! progress gets one final save attempt before the loop returns.

use crate::checkpoint::PositionStore;
use crate::config::IndexerConfig;
use crate::error::{CheckpointError, Result};
use crate::event::ChangeEvent;
use crate::metrics;
use crate::position::LogPosition;
use crate::resilience::{Backoff, RetryConfig};
use crate::resolver::DocumentResolver;
use crate::sink::{Applied, IndexSink, SearchIndex};
use crate::source::{ChangeSource, PollOutcome};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Where the replication loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    Connecting,
    Streaming,
    Applying,
    Recovering,
    Stopped,
}

impl fmt::Display for ReplicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicatorState::Connecting => "Connecting",
            ReplicatorState::Streaming => "Streaming",
            ReplicatorState::Applying => "Applying",
            ReplicatorState::Recovering => "Recovering",
            ReplicatorState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Tuning for the replication loop.
#[derive(Debug, Clone)]
pub struct ReplicatorOptions {
    /// Wait between reconnect attempts.
    pub retry: RetryConfig,
    /// Sleep after an idle poll.
    pub idle_delay: Duration,
    /// Persist the position after this many successful applies.
    pub checkpoint_every: u32,
}

impl ReplicatorOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            retry: config.replicator.retry_config(),
            idle_delay: config.replicator.idle_delay_duration(),
            checkpoint_every: config.checkpoint.every.max(1),
        }
    }

    /// Short waits for tests.
    pub fn testing() -> Self {
        Self {
            retry: RetryConfig::testing(),
            idle_delay: Duration::from_millis(10),
            checkpoint_every: 1,
        }
    }
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default())
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Events that reached the index or were skipped as already deleted.
    pub applied: u64,
    pub replaced: u64,
    pub deleted: u64,
    /// Upserts whose document no longer existed.
    pub skipped: u64,
    /// Events at or before the cursor that were ignored.
    pub stale: u64,
    pub apply_failures: u64,
    /// Times the loop went through recovery.
    pub reconnects: u64,
    /// Last persisted position.
    pub saved: LogPosition,
}

impl RunSummary {
    fn starting_at(saved: LogPosition) -> Self {
        Self {
            applied: 0,
            replaced: 0,
            deleted: 0,
            skipped: 0,
            stale: 0,
            apply_failures: 0,
            reconnects: 0,
            saved,
        }
    }

    fn record(&mut self, applied: Applied) {
        self.applied += 1;
        match applied {
            Applied::Replaced => self.replaced += 1,
            Applied::Deleted { .. } => self.deleted += 1,
            Applied::Skipped => self.skipped += 1,
        }
    }
}

/// Saved position, in-memory cursor, and how many applies are unsaved.
struct Progress {
    saved: LogPosition,
    cursor: LogPosition,
    pending: u32,
}

impl Progress {
    fn new(start: LogPosition) -> Self {
        Self {
            saved: start,
            cursor: start,
            pending: 0,
        }
    }

    fn advance(&mut self, position: LogPosition) {
        self.cursor = position;
        self.pending = self.pending.saturating_add(1);
    }

    /// Forget unsaved progress; the source will redeliver it.
    fn rewind(&mut self) {
        self.cursor = self.saved;
        self.pending = 0;
    }
}

/// Why the loop left the streaming state.
enum Exit {
    Shutdown,
    Recover(&'static str),
}

/// Tails a [`ChangeSource`] and applies every change to a search index.
pub struct Replicator<S, I, R, P> {
    source: S,
    sink: IndexSink<I>,
    resolver: R,
    store: P,
    options: ReplicatorOptions,
    state_tx: watch::Sender<ReplicatorState>,
}

impl<S, I, R, P> Replicator<S, I, R, P>
where
    S: ChangeSource,
    I: SearchIndex,
    R: DocumentResolver,
    P: PositionStore,
{
    pub fn new(
        source: S,
        sink: IndexSink<I>,
        resolver: R,
        store: P,
        options: ReplicatorOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReplicatorState::Connecting);
        Self {
            source,
            sink,
            resolver,
            store,
            options,
            state_tx,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ReplicatorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ReplicatorState {
        *self.state_tx.borrow()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &IndexSink<I> {
        &self.sink
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Run until `shutdown_rx` turns `true` (or its sender is dropped).
    ///
    /// The only error returned is a checkpoint that cannot be read at
    /// startup. Everything after that is retried internally.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<RunSummary> {
        let span = info_span!("replicator");
        async move {
            let start = self.starting_position().await?;
            let mut progress = Progress::new(start);
            let mut summary = RunSummary::starting_at(start);
            let mut backoff = Backoff::new(self.options.retry.clone());

            info!(position = %start, "Starting replicator");

            loop {
                match self
                    .stream_once(&mut progress, &mut summary, &mut backoff, &mut shutdown_rx)
                    .await
                {
                    Exit::Shutdown => break,
                    Exit::Recover(reason) => {
                        self.set_state(ReplicatorState::Recovering);
                        metrics::record_recovery(reason);
                        summary.reconnects += 1;

                        let delay = backoff.next_delay();
                        warn!(
                            reason,
                            saved = %progress.saved,
                            retry_in = ?delay,
                            "Recovering, will re-open from saved position"
                        );
                        if !pause(delay, &mut shutdown_rx).await {
                            break;
                        }
                        progress.rewind();
                    }
                }
            }

            if progress.pending > 0 {
                self.flush(&mut progress).await;
            }
            summary.saved = progress.saved;

            self.set_state(ReplicatorState::Stopped);
            self.store.close().await;
            info!(
                applied = summary.applied,
                reconnects = summary.reconnects,
                saved = %summary.saved,
                "Replicator stopped"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Probe and load the checkpoint. I/O failures are fatal.
    async fn starting_position(&self) -> Result<LogPosition> {
        self.store.probe().await?;

        match self.store.load().await {
            Ok(Some(position)) => {
                info!(position = %position, "Resuming from checkpoint");
                Ok(position)
            }
            Ok(None) => {
                let anchor = LogPosition::now_anchor();
                info!(position = %anchor, "No checkpoint found, starting from now");
                Ok(anchor)
            }
            Err(CheckpointError::Malformed { content }) => {
                let anchor = LogPosition::now_anchor();
                warn!(content = %content, position = %anchor, "Checkpoint unreadable, starting from now");
                Ok(anchor)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect, then stream until the session dies, an apply fails, or
    /// shutdown is requested.
    async fn stream_once(
        &self,
        progress: &mut Progress,
        summary: &mut RunSummary,
        backoff: &mut Backoff,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Exit {
        // Connecting
        let mut session = loop {
            self.set_state(ReplicatorState::Connecting);
            let opened = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return Exit::Shutdown,
                opened = self.source.open(progress.saved) => opened,
            };

            match opened {
                Ok(session) => {
                    metrics::record_connect(true);
                    break session;
                }
                Err(e) => {
                    metrics::record_connect(false);
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "Failed to open replication log");
                    if !pause(delay, shutdown_rx).await {
                        return Exit::Shutdown;
                    }
                }
            }
        };

        info!(after = %progress.saved, "Streaming changes");
        self.set_state(ReplicatorState::Streaming);

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return Exit::Shutdown,
                outcome = self.source.poll(&mut session) => outcome,
            };
            metrics::record_poll(outcome.label());

            match outcome {
                PollOutcome::Event(event) => {
                    if event.position <= progress.cursor {
                        warn!(
                            position = %event.position,
                            cursor = %progress.cursor,
                            "Event at or before cursor, skipping"
                        );
                        metrics::record_event_skipped(event.namespace.as_str(), "stale_position");
                        summary.stale += 1;
                        continue;
                    }

                    self.set_state(ReplicatorState::Applying);
                    if !self.apply(&event, progress, summary).await {
                        return Exit::Recover("apply_failed");
                    }
                    backoff.reset();
                    self.set_state(ReplicatorState::Streaming);
                }
                PollOutcome::Empty { recoverable: true } => {
                    backoff.reset();
                    if progress.pending > 0 {
                        self.flush(progress).await;
                    }
                    if !pause(self.options.idle_delay, shutdown_rx).await {
                        return Exit::Shutdown;
                    }
                }
                PollOutcome::Empty { recoverable: false } => {
                    warn!("Log session invalidated");
                    return Exit::Recover("invalidated");
                }
                PollOutcome::Disconnected { reason } => {
                    warn!(reason = %reason, "Log session disconnected");
                    return Exit::Recover("disconnected");
                }
            }
        }
    }

    /// Apply one event and checkpoint if due. Returns `false` on failure.
    async fn apply(
        &self,
        event: &ChangeEvent,
        progress: &mut Progress,
        summary: &mut RunSummary,
    ) -> bool {
        let namespace = event.namespace.as_str();
        let op = event.kind().as_str();
        let span = info_span!(
            "apply",
            position = %event.position,
            namespace = %namespace,
            op = %op,
            document_id = %event.document_id()
        );

        let started = Instant::now();
        let result = self
            .sink
            .apply(event, &self.resolver)
            .instrument(span)
            .await;
        metrics::record_apply_latency(started.elapsed());

        match result {
            Ok(applied) => {
                if applied != Applied::Skipped {
                    metrics::record_event_applied(namespace, op);
                }
                metrics::record_lag_ms(event.position.lag_ms(&LogPosition::now_anchor()));
                summary.record(applied);
                progress.advance(event.position);

                if progress.pending >= self.options.checkpoint_every {
                    self.flush(progress).await;
                }
                true
            }
            Err(e) => {
                error!(
                    position = %event.position,
                    namespace = %namespace,
                    op = %op,
                    document_id = %event.document_id(),
                    error = %e,
                    "Failed to apply change"
                );
                metrics::record_apply_failure(namespace, op);
                summary.apply_failures += 1;
                false
            }
        }
    }

    /// Persist the cursor. A failure keeps the progress pending.
    async fn flush(&self, progress: &mut Progress) {
        match self.store.save(progress.cursor).await {
            Ok(()) => {
                metrics::record_checkpoint_save(true);
                debug!(position = %progress.cursor, "Checkpoint saved");
                progress.saved = progress.cursor;
                progress.pending = 0;
            }
            Err(e) => {
                metrics::record_checkpoint_save(false);
                warn!(
                    position = %progress.cursor,
                    pending = progress.pending,
                    error = %e,
                    "Failed to save checkpoint, will retry"
                );
            }
        }
    }

    fn set_state(&self, state: ReplicatorState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "State transition");
        }
        metrics::set_replicator_state(&state.to_string());
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay` unless shutdown comes first. Returns `false` on
/// shutdown.
async fn pause(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
