//! Retry with exponential backoff for idempotent adapter calls.
//!
//! Only embeddings go through here. Generation is never retried.

use crate::error::{LlmError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry strategy configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to backoff delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set initial backoff delay
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set maximum backoff delay
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate backoff delay for a given attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u64;

        let delay_ms = delay_ms.min(self.max_backoff_ms);

        let delay_ms = if self.jitter {
            // up to 25% extra
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                debug!(operation = operation_name, error = %e, "non-retryable error");
                return Err(e);
            }
            Err(e) if attempt >= config.max_retries => {
                warn!(
                    operation = operation_name,
                    max_retries = config.max_retries,
                    error = %e,
                    "all retry attempts exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.backoff_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Convenience for adapters: retry an embedding call with the provider's
/// configured retry count.
pub async fn retry_embedding<F, Fut>(vendor: &str, max_retries: u32, f: F) -> Result<Vec<f32>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<f32>>>,
{
    let config = RetryConfig::new(max_retries);
    let operation = format!("{}_embed", vendor);
    let vector = retry_with_backoff(&config, &operation, f).await?;
    if vector.is_empty() {
        return Err(LlmError::protocol(vendor, "empty embedding vector"));
    }
    Ok(vector)
}
