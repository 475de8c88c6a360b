use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::key::{key_for_with_threshold, DEFAULT_KEY_HASH_THRESHOLD};
use crate::local::LocalBackend;
use crate::redis_backend::RedisBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Shared backend URL; `None` runs local-only.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// TTL applied when a caller passes none.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Serialized keys longer than this are hashed.
    #[serde(default = "default_key_hash_threshold")]
    pub key_hash_threshold: usize,

    /// Upper bound for a single shared-backend operation.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            default_ttl_secs: default_ttl_secs(),
            key_hash_threshold: default_key_hash_threshold(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_key_hash_threshold() -> usize {
    DEFAULT_KEY_HASH_THRESHOLD
}

fn default_operation_timeout_ms() -> u64 {
    250
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Backend currently serving requests.
    pub backend: String,
    pub approx_key_count: u64,
}

/// TTL key-value cache with a shared primary backend and a process-local
/// fallback.
///
/// No operation ever fails. When the primary backend errors or times out the
/// operation is served by the local map instead, and a warning is logged once
/// per outage.
pub struct ResultCache {
    primary: Option<Arc<dyn CacheBackend>>,
    local: LocalBackend,
    default_ttl: Duration,
    key_hash_threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicBool,
}

impl ResultCache {
    /// Build a cache from configuration. When the shared backend is not
    /// configured or not reachable at startup, the cache runs local-only.
    pub async fn connect(config: &CacheConfig) -> Self {
        let primary: Option<Arc<dyn CacheBackend>> = match config.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                match RedisBackend::connect(url, config.operation_timeout()).await {
                    Ok(backend) => {
                        info!("result cache using redis");
                        Some(Arc::new(backend))
                    }
                    Err(e) => {
                        warn!(error = %e, "redis unavailable at startup, running local-only");
                        None
                    }
                }
            }
            _ => None,
        };
        Self::build(primary, config)
    }

    /// Local-only cache.
    pub fn local(config: &CacheConfig) -> Self {
        Self::build(None, config)
    }

    /// Cache over an explicit primary backend.
    pub fn with_backend(primary: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self::build(Some(primary), config)
    }

    fn build(primary: Option<Arc<dyn CacheBackend>>, config: &CacheConfig) -> Self {
        Self {
            primary,
            local: LocalBackend::new(),
            default_ttl: config.default_ttl(),
            key_hash_threshold: config.key_hash_threshold,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Derive a key for `shape` under `namespace` with this cache's hash
    /// threshold. Falls back to the bare namespace if the shape cannot be
    /// serialized, which only happens for maps with non-string keys.
    pub fn key<T: Serialize + ?Sized>(&self, namespace: &str, shape: &T) -> String {
        match key_for_with_threshold(namespace, shape, self.key_hash_threshold) {
            Ok(key) => key,
            Err(e) => {
                warn!(namespace, error = %e, "unkeyable request shape");
                namespace.to_string()
            }
        }
    }

    fn primary_failed(&self, op: &str, err: &CacheError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(operation = op, error = %err, "shared cache failing, using local fallback");
        } else {
            debug!(operation = op, error = %err, "shared cache still failing");
        }
    }

    fn primary_ok(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("shared cache recovered");
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(primary) = &self.primary {
            match primary.get(key).await {
                Ok(value) => {
                    self.primary_ok();
                    return value;
                }
                Err(e) => self.primary_failed("get", &e),
            }
        }
        self.local.get_value(key)
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let value = self.get_raw(key).await;
        self.record(value.is_some());
        value
    }

    /// Store `value` under `key`; `None` uses the default TTL.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Some(primary) = &self.primary {
            match primary.set(key, value, ttl).await {
                Ok(()) => {
                    self.primary_ok();
                    return;
                }
                Err(e) => self.primary_failed("set", &e),
            }
        }
        self.local.set_value(key, value, ttl);
    }

    /// Remove a key from every backend. Returns whether anything was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(primary) = &self.primary {
            match primary.delete(key).await {
                Ok(hit) => {
                    self.primary_ok();
                    removed |= hit;
                }
                Err(e) => self.primary_failed("delete", &e),
            }
        }
        // Entries written during an outage live only locally.
        removed |= self.local.delete_key(key);
        removed
    }

    /// Remove every key matching `pattern` from every backend, returning the
    /// number of keys removed.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let mut removed = 0;
        if let Some(primary) = &self.primary {
            match primary.clear_pattern(pattern).await {
                Ok(n) => {
                    self.primary_ok();
                    removed += n;
                }
                Err(e) => self.primary_failed("clear_pattern", &e),
            }
        }
        removed += self.local.clear_matching(pattern);
        debug!(pattern, removed, "cache pattern cleared");
        removed
    }

    /// Decode a JSON value. A value that does not decode counts as a miss and
    /// is evicted.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get_raw(key).await {
            Some(raw) => raw,
            None => {
                self.record(false);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.record(true);
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "evicting undecodable cache entry");
                self.record(false);
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => warn!(key, error = %e, "value not cached, serialization failed"),
        }
    }

    /// Drop expired entries from the local map.
    pub fn purge_expired(&self) -> usize {
        self.local.purge_expired()
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        let (backend, approx_key_count) = match &self.primary {
            Some(primary) => match primary.key_count().await {
                Ok(count) => {
                    self.primary_ok();
                    (primary.name().to_string(), count)
                }
                Err(e) => {
                    self.primary_failed("stats", &e);
                    (self.local_name(), self.local.len() as u64)
                }
            },
            None => (self.local_name(), self.local.len() as u64),
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            backend,
            approx_key_count,
        }
    }

    fn local_name(&self) -> String {
        CacheBackend::name(&self.local).to_string()
    }

    /// Whether the last shared-backend operation failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    /// Backend whose every operation fails.
    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(CacheError::Timeout("set exceeded 250ms".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn clear_pattern(&self, _pattern: &str) -> Result<u64> {
            Err(CacheError::Protocol("unexpected reply".into()))
        }
        async fn key_count(&self) -> Result<u64> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = ResultCache::local(&CacheConfig::default());
        cache.set("k", "v", Some(Duration::from_secs(60))).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.backend, "local");
        assert_eq!(stats.approx_key_count, 1);
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let cache = ResultCache::local(&CacheConfig::default());
        cache.set("k", "v", Some(Duration::from_millis(20))).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_failing_primary_falls_back() {
        let cache = ResultCache::with_backend(Arc::new(DownBackend), &CacheConfig::default());

        cache.set("k", "v", None).await;
        assert!(cache.is_degraded());
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.clear_pattern("k*").await, 1);
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.backend, "local");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Listing {
            ids: Vec<u64>,
        }

        let cache = ResultCache::local(&CacheConfig::default());
        cache.set_json("l", &Listing { ids: vec![1, 2] }, None).await;
        assert_eq!(cache.get_json::<Listing>("l").await, Some(Listing { ids: vec![1, 2] }));

        cache.set("bad", "not json", None).await;
        assert_eq!(cache.get_json::<Listing>("bad").await, None);
        // evicted
        assert_eq!(cache.get("bad").await, None);
    }

    #[test]
    fn test_key_uses_configured_threshold() {
        let config = CacheConfig {
            key_hash_threshold: 10,
            ..Default::default()
        };
        let cache = ResultCache::local(&config);
        let key = cache.key("ns", &serde_json::json!({"field": "a long enough value"}));
        assert_eq!(key.len(), 3 + 64);
    }
}
