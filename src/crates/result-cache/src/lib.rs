//! Result cache for derived generation data.
//!
//! [`ResultCache`] is a TTL key-value store that prefers a shared Redis
//! backend and falls back, per operation, to a process-local map whenever the
//! shared backend fails. Callers never see a cache error.
//!
//! # Example
//!
//! ```rust,ignore
//! use result_cache::{subject_key, CacheConfig, ResultCache};
//!
//! let cache = ResultCache::connect(&CacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     ..Default::default()
//! })
//! .await;
//!
//! cache.set_json(&subject_key(42, "versions"), &versions, None).await;
//! // Any change to subject 42 invalidates all of its derived entries.
//! cache.clear_pattern("subject:42:*").await;
//! ```

pub mod backend;
pub mod cache;
pub mod error;
pub mod key;
pub mod local;
pub mod pattern;
pub mod redis_backend;

pub use backend::CacheBackend;
pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use error::{CacheError, Result};
pub use key::{key_for, key_for_with_threshold, subject_key, subject_pattern, DEFAULT_KEY_HASH_THRESHOLD};
pub use local::LocalBackend;
pub use redis_backend::RedisBackend;
