//! Bearer-token cache for vendors that hand out short-lived access tokens.
//!
//! The cached token is reused until it is within [`EXPIRY_SAFETY_WINDOW`]
//! seconds of expiring. Refreshes are single-flight: concurrent callers that
//! find the token stale wait for the one refresh in progress.

use crate::error::Result;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

/// Seconds before expiry at which a token is considered stale.
pub const EXPIRY_SAFETY_WINDOW: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    exp_unix: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.exp_unix - EXPIRY_SAFETY_WINDOW > now
    }
}

/// A freshly issued token and its lifetime in seconds.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, calling `refresh` only when it is missing or
    /// about to expire.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken>>,
    {
        // Holding the lock across the refresh makes it single-flight.
        let mut slot = self.slot.lock().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let issued = refresh().await?;
        debug!(expires_in = issued.expires_in, "access token refreshed");
        let exp_unix = chrono::Utc::now().timestamp() + issued.expires_in;
        *slot = Some(CachedToken {
            token: issued.token.clone(),
            exp_unix,
        });
        Ok(issued.token)
    }

    /// Drop the cached token, e.g. after the vendor rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
