// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides a Redis container pre-wired as both replication log and
//! document store.

use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Stream key used by integration tests.
pub const STREAM_KEY: &str = "oplog";

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis instance acting as the database being indexed.
pub struct TestDatabase<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub redis_url: String,
}

impl<'a> TestDatabase<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self {
            container,
            redis_url,
        }
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// Append a raw log record; returns the entry ID.
    pub async fn add_record(&self, fields: &[(&str, &str)]) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.xadd(STREAM_KEY, "*", fields).await
    }

    /// Append a log record with an explicit entry ID.
    pub async fn add_record_at(&self, id: &str, fields: &[(&str, &str)]) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.xadd(STREAM_KEY, id, fields).await
    }

    /// Write a document and log its insert, the way the database would.
    pub async fn insert_document(&self, ns: &str, id: &str, json: &str) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(format!("{}:{}", ns, id), json).await?;
        self.add_record(&[("op", "i"), ("ns", ns), ("id", id)]).await
    }

    /// Remove a document and log its delete (ID in the alternate field).
    pub async fn delete_document(&self, ns: &str, id: &str) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(format!("{}:{}", ns, id)).await?;
        self.add_record(&[("op", "d"), ("ns", ns), ("o2_id", id)]).await
    }

    /// Trim the log to its newest `len` entries.
    pub async fn trim(&self, len: usize) -> redis::RedisResult<usize> {
        let mut conn = self.conn().await?;
        redis::cmd("XTRIM")
            .arg(STREAM_KEY)
            .arg("MAXLEN")
            .arg(len)
            .query_async(&mut conn)
            .await
    }
}
