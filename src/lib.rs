// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Change Indexer
//!
//! Tails a database replication log and mirrors every insert, update and
//! delete into a search index, so the index converges on the source of truth.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             change-indexer                                │
//! │                                                                           │
//! │  ┌──────────────┐    ┌────────────┐    ┌───────────────────────────────┐  │
//! │  │ ChangeSource │───►│ Replicator │───►│ IndexSink                     │  │
//! │  │ (XREAD)      │    │ (one event │    │ resolve doc → PUT / DELETE    │  │
//! │  └──────────────┘    │  in flight)│    └───────────────────────────────┘  │
//! │                      └────────────┘                                       │
//! │                            │ save after confirmed apply                   │
//! │                            ▼                                              │
//! │                      ┌───────────────┐                                    │
//! │                      │ PositionStore │                                    │
//! │                      │ (file/SQLite) │                                    │
//! │                      └───────────────┘                                    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! At-least-once. The checkpoint is written only after the index confirmed
//! the change, and both index writes are idempotent, so replaying the unsaved
//! tail after a crash leaves the index unchanged.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use change_indexer::{
//!     Checkpoint, HttpIndex, IndexSink, IndexerConfig, RedisChangeSource,
//!     RedisDocumentResolver, Replicator, ReplicatorOptions,
//! };
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> change_indexer::Result<()> {
//!     let config = IndexerConfig::default();
//!     let source = RedisChangeSource::new(&config.source)?;
//!     let resolver = RedisDocumentResolver::new(
//!         &config.source.redis_url,
//!         config.source.document_prefix.clone(),
//!         config.source.connect_timeout_duration(),
//!     )
//!     .map_err(change_indexer::SinkError::from)?
//!     .with_read_timeout(config.source.read_timeout_duration());
//!     let sink = IndexSink::new(HttpIndex::new(&config.index)?, config.index.doc_type.clone());
//!     let store = Checkpoint::open(&config.checkpoint).await?;
//!
//!     let replicator = Replicator::new(
//!         source,
//!         sink,
//!         resolver,
//!         store,
//!         ReplicatorOptions::from_config(&config),
//!     );
//!     let (_tx, rx) = watch::channel(false);
//!     let summary = replicator.run(rx).await?;
//!     println!("stopped at {}", summary.saved);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod position;
pub mod replicator;
pub mod resilience;
pub mod resolver;
pub mod sink;
pub mod source;

use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, FileCheckpoint, PositionStore, SqliteCheckpoint};
pub use config::{CheckpointBackend, CheckpointConfig, IndexConfig, IndexerConfig, ReplicatorSettings, SourceConfig};
pub use error::{CheckpointError, IndexerError, ResolveError, Result, SinkError, SourceError};
pub use event::{ChangeEvent, ChangeOp, LogRecord, Namespace, OpKind};
pub use position::LogPosition;
pub use replicator::{Replicator, ReplicatorOptions, ReplicatorState, RunSummary};
pub use resilience::{Backoff, RetryConfig};
pub use resolver::{DocumentResolver, RedisDocumentResolver};
pub use sink::{Applied, DocumentAddress, HttpIndex, IndexSink, SearchIndex};
pub use source::{ChangeSource, PollOutcome, RedisChangeSource, RedisSession};
