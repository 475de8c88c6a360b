use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A TTL key-value store holding serialized values.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name reported in stats ("redis", "local", ...).
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key matching a glob pattern, returning the count.
    async fn clear_pattern(&self, pattern: &str) -> Result<u64>;

    /// Approximate number of live keys.
    async fn key_count(&self) -> Result<u64>;
}
