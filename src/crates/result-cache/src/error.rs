//! Cache backend errors.
//!
//! These never reach users of [`ResultCache`](crate::ResultCache): every
//! failure of the shared backend is absorbed by the local fallback. They are
//! surfaced by the [`CacheBackend`](crate::CacheBackend) trait so the fallback
//! logic can log what went wrong.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backend could not be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within the operation timeout.
    #[error("cache operation timed out: {0}")]
    Timeout(String),

    /// The backend answered with something unexpected, or a value could not
    /// be encoded.
    #[error("cache protocol error: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Protocol(err.to_string())
        }
    }
}
