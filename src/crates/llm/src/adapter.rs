//! The common call contract every vendor adapter implements.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lowest accepted sampling temperature.
pub const MIN_TEMPERATURE: f32 = 0.0;
/// Highest accepted sampling temperature.
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Normalized result of a `generate` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Tokens billed for the call; 0 when the vendor did not report usage.
    pub tokens_used: u64,
}

impl Generation {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// Capability interface shared by all vendors.
///
/// Implementations must be stateless with respect to business data; the only
/// state an adapter may keep is its own credential cache.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Vendor name used in errors and metrics.
    fn vendor(&self) -> &str;

    /// Model identifier sent to the vendor.
    fn model(&self) -> &str;

    /// Generate text for a single prompt.
    ///
    /// Never retried: generation is not idempotent and retries could bill twice.
    /// A `max_tokens` of 0 leaves the limit to the vendor.
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation>;

    /// Embed a text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Check whether the vendor is reachable.
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Clamp a temperature into the accepted range.
pub fn clamp_temperature(vendor: &str, temperature: f32) -> f32 {
    if temperature.is_nan() {
        debug!(vendor, "NaN temperature replaced by 0");
        return MIN_TEMPERATURE;
    }
    let clamped = temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    if clamped != temperature {
        debug!(vendor, requested = temperature, clamped, "temperature clamped");
    }
    clamped
}
