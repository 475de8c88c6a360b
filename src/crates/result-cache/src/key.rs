//! Cache key derivation.
//!
//! A key is `namespace:` followed by the request shape serialized as JSON.
//! Object fields are sorted before serializing, so two shapes with the same
//! fields produce the same key regardless of declaration or insertion order.
//! Keys longer than the hash threshold are replaced by `namespace:` and the
//! SHA-256 of the serialized shape.

use crate::error::{CacheError, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Display;

/// Serialized keys longer than this many characters are hashed.
pub const DEFAULT_KEY_HASH_THRESHOLD: usize = 200;

/// Derive a key with the default hash threshold.
pub fn key_for<T: Serialize + ?Sized>(namespace: &str, shape: &T) -> Result<String> {
    key_for_with_threshold(namespace, shape, DEFAULT_KEY_HASH_THRESHOLD)
}

pub fn key_for_with_threshold<T: Serialize + ?Sized>(
    namespace: &str,
    shape: &T,
    threshold: usize,
) -> Result<String> {
    let value = serde_json::to_value(shape)
        .map_err(|e| CacheError::Protocol(format!("request shape is not serializable: {}", e)))?;
    let serialized = canonical(value).to_string();

    let key = format!("{}:{}", namespace, serialized);
    if key.chars().count() <= threshold {
        return Ok(key);
    }
    let digest = Sha256::digest(serialized.as_bytes());
    Ok(format!("{}:{:x}", namespace, digest))
}

/// Rebuild objects with their keys in sorted order, whatever map type
/// `serde_json` was compiled with.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonical(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

/// Key scoped to one subject: `subject:{id}:{suffix}`.
pub fn subject_key(subject_id: impl Display, suffix: &str) -> String {
    format!("subject:{}:{}", subject_id, suffix)
}

/// Pattern covering every key of one subject.
pub fn subject_pattern(subject_id: impl Display) -> String {
    format!("subject:{}:*", subject_id)
}
