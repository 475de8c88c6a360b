//! Redis backend.
//!
//! Uses a [`ConnectionManager`], which reconnects on its own after the server
//! comes back. Every command is bounded by the operation timeout.

use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisBackend {
    /// Connect to `url`, failing if the server is not reachable within
    /// `op_timeout`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| CacheError::Protocol(format!("invalid redis url: {}", e)))?;
        let manager = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(format!("connecting to {}", redact(url))))??;
        debug!(url = %redact(url), "connected to redis");
        Ok(Self { manager, op_timeout })
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(format!(
                "{} exceeded {}ms",
                op,
                self.op_timeout.as_millis()
            ))),
        }
    }

    async fn query<T: FromRedisValue>(&self, op: &str, cmd: redis::Cmd) -> Result<T> {
        let mut conn = self.manager.clone();
        self.bounded(op, async move { cmd.query_async::<_, T>(&mut conn).await })
            .await
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let millis = ttl.as_millis().max(1) as u64;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(millis);
        self.query("SET", cmd).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.query("DEL", cmd).await?;
        Ok(removed > 0)
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) = self.query("SCAN", scan).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let n: u64 = self.query("DEL", del).await?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, removed, "redis pattern cleared");
        Ok(removed)
    }

    async fn key_count(&self) -> Result<u64> {
        self.query("DBSIZE", redis::cmd("DBSIZE")).await
    }
}

/// Strip credentials from a redis URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
