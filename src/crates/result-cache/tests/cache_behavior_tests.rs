use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use result_cache::{
    subject_key, subject_pattern, CacheBackend, CacheConfig, CacheError, LocalBackend, ResultCache,
};

/// Wraps a local map and fails every call while `down` is set.
struct SwitchableBackend {
    inner: LocalBackend,
    down: AtomicBool,
}

impl SwitchableBackend {
    fn new() -> Self {
        Self {
            inner: LocalBackend::new(),
            down: AtomicBool::new(false),
        }
    }

    fn check(&self) -> result_cache::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection reset by peer".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn get(&self, key: &str) -> result_cache::Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> result_cache::Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> result_cache::Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn clear_pattern(&self, pattern: &str) -> result_cache::Result<u64> {
        self.check()?;
        self.inner.clear_pattern(pattern).await
    }

    async fn key_count(&self) -> result_cache::Result<u64> {
        self.check()?;
        self.inner.key_count().await
    }
}

const MIXED_KEYS: [&str; 6] = [
    "subject:42:versions",
    "subject:42:references:abc",
    "subject:420:versions",
    "subject:4:versions",
    "subject:1:42:versions",
    "global:subject:42:x",
];

#[tokio::test]
async fn clear_pattern_removes_exactly_the_subject_prefix() {
    let cache = ResultCache::local(&CacheConfig::default());
    for key in MIXED_KEYS {
        cache.set(key, "v", None).await;
    }

    let removed = cache.clear_pattern(&subject_pattern(42)).await;
    assert_eq!(removed, 2);

    assert_eq!(cache.get("subject:42:versions").await, None);
    assert_eq!(cache.get("subject:42:references:abc").await, None);
    for key in &MIXED_KEYS[2..] {
        assert!(cache.get(key).await.is_some(), "{key} should survive");
    }
}

#[tokio::test]
async fn clear_pattern_reaches_entries_written_during_outage() {
    let backend = Arc::new(SwitchableBackend::new());
    let cache = ResultCache::with_backend(backend.clone(), &CacheConfig::default());

    cache.set(&subject_key(42, "versions"), "shared", None).await;

    backend.down.store(true, Ordering::SeqCst);
    cache.set(&subject_key(42, "references:x"), "local-only", None).await;
    assert!(cache.is_degraded());
    backend.down.store(false, Ordering::SeqCst);

    assert_eq!(cache.clear_pattern("subject:42:*").await, 2);
    assert_eq!(cache.get(&subject_key(42, "versions")).await, None);
}

#[tokio::test]
async fn outage_is_transparent_to_callers() {
    let backend = Arc::new(SwitchableBackend::new());
    let cache = ResultCache::with_backend(backend.clone(), &CacheConfig::default());

    backend.down.store(true, Ordering::SeqCst);
    cache.set("k", "v", Some(Duration::from_secs(30))).await;
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    assert!(cache.delete("k").await);
    assert_eq!(cache.stats().await.backend, "local");

    backend.down.store(false, Ordering::SeqCst);
    cache.set("k2", "v2", None).await;
    assert!(!cache.is_degraded());
    let stats = cache.stats().await;
    assert_eq!(stats.backend, "switchable");
    assert_eq!(stats.approx_key_count, 1);
}

#[tokio::test]
async fn distinct_keys_written_concurrently_are_all_readable() {
    let cache = Arc::new(ResultCache::local(&CacheConfig::default()));

    let mut handles = Vec::new();
    for i in 0..64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.set(&format!("k{i}"), &i.to_string(), None).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..64 {
        assert_eq!(cache.get(&format!("k{i}")).await, Some(i.to_string()));
    }
}

#[tokio::test]
async fn unreachable_redis_at_startup_runs_local_only() {
    let cache = ResultCache::connect(&CacheConfig {
        redis_url: Some("redis://127.0.0.1:1/".into()),
        operation_timeout_ms: 200,
        ..Default::default()
    })
    .await;

    cache.set("k", "v", None).await;
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    assert_eq!(cache.stats().await.backend, "local");
}
