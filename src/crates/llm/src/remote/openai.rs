//! OpenAI adapter.
//!
//! Talks to the chat completions and embeddings endpoints. Vendors that speak
//! the same wire format (Deepseek) reuse this adapter through
//! [`OpenAiClient::compatible`].
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ProviderAdapter, ProviderConfig, Vendor};
//! use llm::remote::OpenAiClient;
//!
//! let config = ProviderConfig::new("gpt4o", Vendor::OpenAi, "gpt-4o")
//!     .with_api_key(std::env::var("OPENAI_API_KEY")?);
//! let client = OpenAiClient::new(config)?;
//! let generation = client.generate("Summarize our offer", 0.7, 512).await?;
//! ```

use crate::adapter::{clamp_temperature, Generation, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{build_http_client, send_json};
use crate::retry::retry_embedding;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// OpenAI (and OpenAI-compatible) API client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: ProviderConfig,
    api_key: String,
    client: Client,
    supports_embeddings: bool,
}

impl OpenAiClient {
    /// Create a client for the OpenAI API.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::build(config, true)
    }

    /// Create a client for an OpenAI-compatible vendor without an
    /// embeddings endpoint.
    pub fn compatible(config: ProviderConfig) -> Result<Self> {
        Self::build(config, false)
    }

    fn build(config: ProviderConfig, supports_embeddings: bool) -> Result<Self> {
        config.validate()?;
        let api_key = config.require_api_key()?.to_string();
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            api_key,
            client,
            supports_embeddings,
        })
    }

    fn vendor_name(&self) -> &'static str {
        self.config.vendor.as_str()
    }

    fn build_request(&self, prompt: &str, temperature: f32, max_tokens: u32) -> OpenAiRequest {
        let defaults = &self.config.defaults;
        OpenAiRequest {
            model: self.config.model.clone(),
            messages: vec![OpenAiMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
            temperature: Some(clamp_temperature(self.vendor_name(), temperature)),
            max_tokens: (max_tokens > 0).then_some(max_tokens),
            top_p: Some(defaults.top_p),
            frequency_penalty: (defaults.frequency_penalty != 0.0).then_some(defaults.frequency_penalty),
            presence_penalty: (defaults.presence_penalty != 0.0).then_some(defaults.presence_penalty),
            stream: false,
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.endpoint());
        let body = OpenAiEmbeddingRequest {
            model: DEFAULT_EMBEDDING_MODEL,
            input: text,
        };
        let request = self.client.post(&url).bearer_auth(&self.api_key).json(&body);
        let response: OpenAiEmbeddingResponse = send_json(self.vendor_name(), request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::protocol(self.vendor_name(), "embedding response has no data"))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiClient {
    fn vendor(&self) -> &str {
        self.vendor_name()
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.config.endpoint());
        let body = self.build_request(prompt, temperature, max_tokens);

        debug!(vendor = self.vendor_name(), model = %self.config.model, "sending chat completion");
        let request = self.client.post(&url).bearer_auth(&self.api_key).json(&body);
        let response: OpenAiResponse = send_json(self.vendor_name(), request).await?;

        if let Some(error) = response.error {
            return Err(LlmError::rejected(self.vendor_name(), None, error.message));
        }

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::protocol(self.vendor_name(), "response has no choices"))?;

        Ok(Generation::new(text, normalize_usage(response.usage.as_ref())))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.supports_embeddings {
            return Err(LlmError::unsupported(self.vendor_name(), "embed"));
        }
        retry_embedding(self.vendor_name(), self.config.connection.max_retries, || {
            self.embed_once(text)
        })
        .await
    }

    async fn ping(&self) -> Result<bool> {
        let url = format!("{}/models", self.config.endpoint());
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!(vendor = self.vendor_name(), error = %e, "ping failed");
                Ok(false)
            }
        }
    }
}

/// Token usage of a chat completion; missing counts are 0.
fn normalize_usage(usage: Option<&OpenAiUsage>) -> u64 {
    match usage {
        Some(u) => u
            .total_tokens
            .unwrap_or_else(|| u.prompt_tokens.unwrap_or(0) + u.completion_tokens.unwrap_or(0)),
        None => 0,
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Vendor;

    fn config() -> ProviderConfig {
        ProviderConfig::new("gpt", Vendor::OpenAi, "gpt-4o").with_api_key("sk-test")
    }

    #[test]
    fn test_client_creation_requires_key() {
        assert!(OpenAiClient::new(config()).is_ok());
        let err = OpenAiClient::new(ProviderConfig::new("gpt", Vendor::OpenAi, "gpt-4o"))
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::Configuration { .. }));
    }

    #[test]
    fn test_request_clamps_temperature_and_omits_zero_max_tokens() {
        let client = OpenAiClient::new(config()).unwrap();
        let request = client.build_request("hi", 5.0, 0);
        assert_eq!(request.temperature, Some(2.0));
        assert_eq!(request.max_tokens, None);

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_normalize_usage() {
        let usage: OpenAiUsage =
            serde_json::from_str(r#"{"prompt_tokens": 10, "completion_tokens": 32, "total_tokens": 42}"#)
                .unwrap();
        assert_eq!(normalize_usage(Some(&usage)), 42);

        let partial: OpenAiUsage = serde_json::from_str(r#"{"prompt_tokens": 10, "completion_tokens": 5}"#).unwrap();
        assert_eq!(normalize_usage(Some(&partial)), 15);

        let nulls: OpenAiUsage = serde_json::from_str(r#"{"total_tokens": null}"#).unwrap();
        assert_eq!(normalize_usage(Some(&nulls)), 0);

        assert_eq!(normalize_usage(None), 0);
    }

    #[test]
    fn test_response_without_usage_parses() {
        let response: OpenAiResponse = serde_json::from_str(
            r#"{"id": "x", "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}}]}"#,
        )
        .unwrap();
        assert!(response.usage.is_none());
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_compatible_client_has_no_embeddings() {
        let config = ProviderConfig::new("ds", Vendor::Deepseek, "deepseek-chat").with_api_key("k");
        let client = OpenAiClient::compatible(config).unwrap();
        assert_eq!(client.vendor(), "deepseek");
        let err = client.embed("text").await.unwrap_err();
        assert!(matches!(err, LlmError::Unsupported { .. }));
    }
}
