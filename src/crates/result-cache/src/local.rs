//! In-process backend used as the fallback.
//!
//! Entries live in a sharded [`DashMap`], so operations on distinct keys do
//! not contend. Expired entries are dropped lazily on read and by
//! [`LocalBackend::purge_expired`]. Nothing survives a restart.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::pattern::glob_match;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A cached value with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct LocalBackend {
    entries: DashMap<String, CacheEntry>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // Re-check under the write lock so a concurrent fresh write wins.
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }

    pub fn set_value(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
    }

    pub fn delete_key(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear_matching(&self, pattern: &str) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        before.saturating_sub(self.entries.len()) as u64
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.set_value(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.delete_key(key))
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64> {
        Ok(self.clear_matching(pattern))
    }

    async fn key_count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }
}
