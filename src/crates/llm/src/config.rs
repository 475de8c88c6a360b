//! Provider configuration.
//!
//! A [`ProviderConfig`] is the persisted description of one configured
//! provider: which vendor it talks to, how to reach it, the generation
//! defaults to use, and lifetime usage counters.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Supported vendors. Each vendor maps to exactly one adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// OpenAI chat completions and embeddings.
    #[serde(alias = "open_ai")]
    OpenAi,
    /// Anthropic messages API.
    #[serde(alias = "claude")]
    Anthropic,
    /// Google Gemini API.
    #[serde(alias = "google")]
    Gemini,
    /// Deepseek (OpenAI-compatible wire format).
    Deepseek,
    /// Local Ollama server.
    Ollama,
    /// Baidu Qianfan (ERNIE), short-lived OAuth bearer tokens.
    #[serde(alias = "ernie", alias = "wenxin")]
    Qianfan,
}

impl Vendor {
    /// Default API base for the vendor.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "https://api.openai.com/v1",
            Vendor::Anthropic => "https://api.anthropic.com",
            Vendor::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Vendor::Deepseek => "https://api.deepseek.com",
            Vendor::Ollama => "http://localhost:11434",
            Vendor::Qianfan => "https://aip.baidubce.com",
        }
    }

    /// Whether calls need an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Vendor::Ollama)
    }

    /// Whether the vendor exchanges a key/secret pair for a bearer token.
    pub fn requires_secret_key(&self) -> bool {
        matches!(self, Vendor::Qianfan)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Gemini => "gemini",
            Vendor::Deepseek => "deepseek",
            Vendor::Ollama => "ollama",
            Vendor::Qianfan => "qianfan",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to reach a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// API base URL. Falls back to [`Vendor::default_endpoint`] when empty.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key (or client id for token-exchange vendors).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client secret for token-exchange vendors.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for idempotent calls (embeddings only).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            secret_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Generation defaults applied when the caller does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Lifetime usage counters of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub tokens_consumed: u64,
}

impl UsageCounters {
    /// Record one generation attempt.
    pub fn record(&mut self, success: bool, tokens: u64) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        self.tokens_consumed += tokens;
    }

    /// Fraction of successful calls, 0 when nothing was recorded yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// Configuration of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id, e.g. "gpt4o" or "claude-sonnet".
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,

    pub vendor: Vendor,

    /// Vendor model identifier.
    pub model: String,

    #[serde(default)]
    pub connection: ConnectionParams,

    #[serde(default)]
    pub defaults: GenerationDefaults,

    #[serde(default)]
    pub counters: UsageCounters,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl ProviderConfig {
    /// Create a new provider configuration with default connection settings.
    pub fn new(id: impl Into<String>, vendor: Vendor, model: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            vendor,
            model: model.into(),
            connection: ConnectionParams::default(),
            defaults: GenerationDefaults::default(),
            counters: UsageCounters::default(),
            is_active: true,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.connection.api_key = Some(api_key.into());
        self
    }

    /// Set the secret key used by token-exchange vendors.
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.connection.secret_key = Some(secret_key.into());
        self
    }

    /// Set the API base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.connection.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the maximum number of retries for idempotent calls.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.connection.max_retries = max_retries;
        self
    }

    /// Effective endpoint without a trailing slash.
    pub fn endpoint(&self) -> String {
        self.connection
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.vendor.default_endpoint())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout_secs.max(1))
    }

    pub fn success_rate(&self) -> f64 {
        self.counters.success_rate()
    }

    /// API key, or a configuration error when the vendor needs one.
    pub fn require_api_key(&self) -> Result<&str> {
        non_empty(self.connection.api_key.as_deref()).ok_or_else(|| {
            LlmError::configuration(
                self.vendor.as_str(),
                format!("provider '{}' has no api_key", self.id),
            )
        })
    }

    /// Secret key, or a configuration error.
    pub fn require_secret_key(&self) -> Result<&str> {
        non_empty(self.connection.secret_key.as_deref()).ok_or_else(|| {
            LlmError::configuration(
                self.vendor.as_str(),
                format!("provider '{}' has no secret_key", self.id),
            )
        })
    }

    /// Check that everything needed to call the vendor is present.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::configuration(
                self.vendor.as_str(),
                format!("provider '{}' has no model", self.id),
            ));
        }
        if self.vendor.requires_api_key() {
            self.require_api_key()?;
        }
        if self.vendor.requires_secret_key() {
            self.require_secret_key()?;
        }
        let endpoint = self.endpoint();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(LlmError::configuration(
                self.vendor.as_str(),
                format!("provider '{}' has invalid endpoint '{}'", self.id, endpoint),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_active() -> bool {
    true
}
