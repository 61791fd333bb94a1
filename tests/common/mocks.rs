// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory doubles for the replicator's collaborators.
//!
//! Every double is a cheap `Clone` around shared state, so a test can hand
//! one copy to the [`Replicator`](change_indexer::Replicator) and keep
//! another for assertions.

use change_indexer::checkpoint::CheckpointResult;
use change_indexer::{
    BoxFuture, ChangeEvent, ChangeOp, ChangeSource, CheckpointError, DocumentAddress,
    DocumentResolver, LogPosition, Namespace, PollOutcome, PositionStore, ResolveError,
    SearchIndex, SinkError, SourceError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Event helpers
// =============================================================================

pub fn pos(time: u64) -> LogPosition {
    LogPosition::new(time, 0)
}

pub fn insert(ns: &str, id: &str, time: u64) -> ChangeEvent {
    event(ns, ChangeOp::Insert { document_id: id.to_string() }, time)
}

pub fn update(ns: &str, id: &str, time: u64) -> ChangeEvent {
    event(ns, ChangeOp::Update { document_id: id.to_string() }, time)
}

pub fn delete(ns: &str, id: &str, time: u64) -> ChangeEvent {
    event(ns, ChangeOp::Delete { document_id: id.to_string() }, time)
}

fn event(ns: &str, op: ChangeOp, time: u64) -> ChangeEvent {
    ChangeEvent::new(Namespace::parse(ns).unwrap(), op, pos(time))
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns whether it held.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await a future with a generous test timeout.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

// =============================================================================
// Scripted change source
// =============================================================================

/// Fault injected once, right before a given log entry would be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Disconnect,
    Invalidate,
}

#[derive(Default)]
struct SourceState {
    log: Vec<ChangeEvent>,
    faults: Vec<(LogPosition, Fault)>,
    open_failures: u32,
    opens: Vec<LogPosition>,
    open_attempts: usize,
    delivered: Vec<LogPosition>,
    idle_polls: usize,
}

/// A replication log held in memory.
///
/// Entries are delivered verbatim in log order, starting with the first
/// entry whose position is after the open position. Entries may be out of
/// order on purpose to exercise the replicator's monotonicity guard.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<SourceState>>,
}

pub struct ScriptedSession {
    index: usize,
}

impl ScriptedSource {
    pub fn new(log: Vec<ChangeEvent>) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().log = log;
        source
    }

    /// Append entries to the tail of the log.
    pub fn append(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        self.state.lock().unwrap().log.extend(events);
    }

    /// Inject a one-shot fault before the entry at `position` is delivered.
    pub fn fault_before(&self, position: LogPosition, fault: Fault) {
        self.state.lock().unwrap().faults.push((position, fault));
    }

    /// Make the next `n` opens fail.
    pub fn fail_opens(&self, n: u32) {
        self.state.lock().unwrap().open_failures = n;
    }

    /// Positions of every successful open.
    pub fn opens(&self) -> Vec<LogPosition> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().unwrap().open_attempts
    }

    /// Positions handed out by `poll`, in order.
    pub fn delivered(&self) -> Vec<LogPosition> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn idle_polls(&self) -> usize {
        self.state.lock().unwrap().idle_polls
    }
}

impl ChangeSource for ScriptedSource {
    type Session = ScriptedSession;

    fn open(&self, after: LogPosition) -> BoxFuture<'_, Result<ScriptedSession, SourceError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.open_attempts += 1;
            if state.open_failures > 0 {
                state.open_failures -= 1;
                return Err(SourceError::unavailable("connect", "connection refused"));
            }
            state.opens.push(after);
            let index = state
                .log
                .iter()
                .position(|e| e.position > after)
                .unwrap_or(state.log.len());
            Ok(ScriptedSession { index })
        })
    }

    fn poll<'a>(&'a self, session: &'a mut ScriptedSession) -> BoxFuture<'a, PollOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let Some(next) = state.log.get(session.index).cloned() else {
                state.idle_polls += 1;
                return PollOutcome::Empty { recoverable: true };
            };

            if let Some(i) = state.faults.iter().position(|(p, _)| *p == next.position) {
                let (_, fault) = state.faults.remove(i);
                return match fault {
                    Fault::Disconnect => PollOutcome::Disconnected {
                        reason: "connection reset".to_string(),
                    },
                    Fault::Invalidate => PollOutcome::Empty { recoverable: false },
                };
            }

            session.index += 1;
            state.delivered.push(next.position);
            PollOutcome::Event(next)
        })
    }
}

// =============================================================================
// In-memory search index
// =============================================================================

/// A write that reached the index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexCall {
    Replace { address: String, body: Value },
    Delete { address: String },
}

#[derive(Default)]
struct IndexState {
    docs: HashMap<String, Value>,
    calls: Vec<IndexCall>,
    fail_next: u32,
}

/// Search index that keeps documents in a map and records every call.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    state: Arc<Mutex<IndexState>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with HTTP 503.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn get(&self, address: &str) -> Option<Value> {
        self.state.lock().unwrap().docs.get(address).cloned()
    }

    /// Current index content.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.state.lock().unwrap().docs.clone()
    }

    fn check_failure(state: &mut IndexState, address: &DocumentAddress) -> Result<(), SinkError> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Index {
                address: address.to_string(),
                status: Some(503),
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl SearchIndex for MemoryIndex {
    fn replace<'a>(
        &'a self,
        address: &'a DocumentAddress,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::check_failure(&mut state, address)?;
            state.calls.push(IndexCall::Replace {
                address: address.to_string(),
                body: body.clone(),
            });
            state.docs.insert(address.to_string(), body.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, address: &'a DocumentAddress) -> BoxFuture<'a, Result<bool, SinkError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::check_failure(&mut state, address)?;
            state.calls.push(IndexCall::Delete {
                address: address.to_string(),
            });
            Ok(state.docs.remove(&address.to_string()).is_some())
        })
    }
}

// =============================================================================
// In-memory document store
// =============================================================================

/// Source of truth keyed by `(namespace, id)`.
#[derive(Clone, Default)]
pub struct MemoryResolver {
    docs: Arc<Mutex<HashMap<(String, String), Value>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, ns: &str, id: &str, doc: Value) {
        self.docs
            .lock()
            .unwrap()
            .insert((ns.to_string(), id.to_string()), doc);
    }

    pub fn remove(&self, ns: &str, id: &str) {
        self.docs.lock().unwrap().remove(&(ns.to_string(), id.to_string()));
    }
}

impl DocumentResolver for MemoryResolver {
    fn fetch<'a>(
        &'a self,
        namespace: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>, ResolveError>> {
        Box::pin(async move {
            Ok(self
                .docs
                .lock()
                .unwrap()
                .get(&(namespace.as_str().to_string(), id.to_string()))
                .cloned())
        })
    }
}

// =============================================================================
// Flaky position store
// =============================================================================

#[derive(Default)]
struct StoreState {
    content: Option<String>,
    save_attempts: Vec<LogPosition>,
    fail_saves: u32,
    fail_probe: bool,
    closed: bool,
}

/// Checkpoint that can be told to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    state: Arc<Mutex<StoreState>>,
}

impl FlakyStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn at(position: LogPosition) -> Self {
        Self::with_content(&position.to_string())
    }

    /// Store raw text, e.g. something unparsable.
    pub fn with_content(content: &str) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().content = Some(content.to_string());
        store
    }

    pub fn fail_probe(&self) {
        self.state.lock().unwrap().fail_probe = true;
    }

    /// Fail the next `n` saves.
    pub fn fail_saves(&self, n: u32) {
        self.state.lock().unwrap().fail_saves = n;
    }

    /// Currently stored position.
    pub fn stored(&self) -> Option<LogPosition> {
        self.state
            .lock()
            .unwrap()
            .content
            .as_deref()
            .and_then(|c| c.parse().ok())
    }

    /// Every save call, including failed ones.
    pub fn save_attempts(&self) -> Vec<LogPosition> {
        self.state.lock().unwrap().save_attempts.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn io_error(kind: std::io::ErrorKind) -> CheckpointError {
        CheckpointError::Io {
            path: "memory".into(),
            source: std::io::Error::new(kind, "injected failure"),
        }
    }
}

impl PositionStore for FlakyStore {
    fn probe(&self) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            if self.state.lock().unwrap().fail_probe {
                return Err(Self::io_error(std::io::ErrorKind::PermissionDenied));
            }
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, CheckpointResult<Option<LogPosition>>> {
        Box::pin(async move {
            let content = self.state.lock().unwrap().content.clone();
            match content {
                None => Ok(None),
                Some(c) => c
                    .parse()
                    .map(Some)
                    .map_err(|_| CheckpointError::Malformed { content: c }),
            }
        })
    }

    fn save(&self, position: LogPosition) -> BoxFuture<'_, CheckpointResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.save_attempts.push(position);
            if state.fail_saves > 0 {
                state.fail_saves -= 1;
                return Err(Self::io_error(std::io::ErrorKind::Other));
            }
            state.content = Some(position.to_string());
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().unwrap().closed = true;
        })
    }
}
