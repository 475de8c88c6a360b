//! Ollama adapter for locally hosted models.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ProviderAdapter, ProviderConfig, Vendor};
//! use llm::local::OllamaClient;
//!
//! let config = ProviderConfig::new("local", Vendor::Ollama, "llama3.1");
//! let client = OllamaClient::new(config)?;
//! let generation = client.generate("Hello!", 0.7, 0).await?;
//! ```

use crate::adapter::{clamp_temperature, Generation, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{build_http_client, send_json};
use crate::retry::retry_embedding;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Ollama client for local LLM inference.
#[derive(Clone)]
pub struct OllamaClient {
    config: ProviderConfig,
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    /// Check if the Ollama server is running.
    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.endpoint());
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!(vendor = "ollama", error = %e, "health check failed");
                Ok(false)
            }
        }
    }

    fn build_request(&self, prompt: &str, temperature: f32, max_tokens: u32) -> OllamaRequest {
        let mut options: HashMap<&'static str, serde_json::Value> = HashMap::new();
        options.insert(
            "temperature",
            serde_json::json!(clamp_temperature("ollama", temperature)),
        );
        if max_tokens > 0 {
            options.insert("num_predict", serde_json::json!(max_tokens));
        }
        OllamaRequest {
            model: self.config.model.clone(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: Some(options),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.endpoint());
        let body = OllamaEmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        };
        let response: OllamaEmbeddingResponse =
            send_json("ollama", self.client.post(&url).json(&body)).await?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaClient {
    fn vendor(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation> {
        let url = format!("{}/api/chat", self.config.endpoint());
        let body = self.build_request(prompt, temperature, max_tokens);

        debug!(vendor = "ollama", model = %self.config.model, "sending chat request");
        let response: OllamaResponse = send_json("ollama", self.client.post(&url).json(&body)).await?;

        if let Some(error) = response.error {
            return Err(LlmError::rejected("ollama", None, error));
        }
        let message = response
            .message
            .ok_or_else(|| LlmError::protocol("ollama", "response has no message"))?;

        Ok(Generation::new(
            message.content,
            normalize_usage(response.prompt_eval_count, response.eval_count),
        ))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        retry_embedding("ollama", self.config.connection.max_retries, || self.embed_once(text)).await
    }

    async fn ping(&self) -> Result<bool> {
        self.check_health().await
    }
}

/// Prompt plus generated tokens; missing counts are 0.
fn normalize_usage(prompt_eval_count: Option<u64>, eval_count: Option<u64>) -> u64 {
    prompt_eval_count.unwrap_or(0) + eval_count.unwrap_or(0)
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<&'static str, serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}
