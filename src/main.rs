// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! change-indexer daemon
//!
//! Wires the Redis replication log, the Redis document store, the HTTP
//! search index and the checkpoint together and runs until Ctrl-C/SIGTERM.

use anyhow::Context;
use change_indexer::{
    Checkpoint, HttpIndex, IndexSink, IndexerConfig, RedisChangeSource, RedisDocumentResolver,
    Replicator, ReplicatorOptions,
};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mirror a replication log into a search index
#[derive(Parser, Debug)]
#[command(name = "change-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "CHANGE_INDEXER_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL for the replication log and documents
    #[arg(long, env = "CHANGE_INDEXER_REDIS_URL")]
    redis_url: Option<String>,

    /// Base URL of the search index
    #[arg(long, env = "CHANGE_INDEXER_INDEX_URL")]
    index_url: Option<String>,

    /// Checkpoint location (file path or SQLite database)
    #[arg(long, env = "CHANGE_INDEXER_CHECKPOINT")]
    checkpoint: Option<String>,

    /// Stream key holding the replication log
    #[arg(long, env = "CHANGE_INDEXER_STREAM_KEY")]
    stream_key: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<IndexerConfig> {
        let mut config = match &self.config {
            Some(path) => IndexerConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => IndexerConfig::default(),
        };

        if let Some(url) = &self.redis_url {
            config.source.redis_url = url.clone();
        }
        if let Some(url) = &self.index_url {
            config.index.url = url.clone();
        }
        if let Some(path) = &self.checkpoint {
            config.checkpoint.path = path.clone();
        }
        if let Some(key) = &self.stream_key {
            config.source.stream_key = key.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = format!("{e:#}"), "change-indexer failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    let source = RedisChangeSource::new(&config.source).context("replication log")?;
    let resolver = RedisDocumentResolver::new(
        &config.source.redis_url,
        config.source.document_prefix.clone(),
        config.source.connect_timeout_duration(),
    )
    .context("document store")?
    .with_read_timeout(config.source.read_timeout_duration());
    let index = HttpIndex::new(&config.index).context("search index")?;
    let store = Checkpoint::open(&config.checkpoint)
        .await
        .with_context(|| format!("checkpoint {}", config.checkpoint.path))?;

    let replicator = Replicator::new(
        source,
        IndexSink::new(index, config.index.doc_type.clone()),
        resolver,
        store,
        ReplicatorOptions::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let summary = replicator.run(shutdown_rx).await?;
    info!(
        applied = summary.applied,
        replaced = summary.replaced,
        deleted = summary.deleted,
        skipped = summary.skipped,
        reconnects = summary.reconnects,
        saved = %summary.saved,
        "Shutdown complete"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
