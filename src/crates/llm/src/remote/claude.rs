//! Anthropic Claude adapter (messages API).
//!
//! Anthropic has no embeddings endpoint; `embed` reports `Unsupported`.

use crate::adapter::{clamp_temperature, Generation, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{build_http_client, send_json};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct ClaudeClient {
    config: ProviderConfig,
    api_key: String,
    client: Client,
}

impl ClaudeClient {
    /// Create a new Claude client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.require_api_key()?.to_string();
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn build_request(&self, prompt: &str, temperature: f32, max_tokens: u32) -> ClaudeRequest {
        // The messages API requires max_tokens.
        let max_tokens = if max_tokens > 0 {
            max_tokens
        } else {
            self.config.defaults.max_tokens
        };
        ClaudeRequest {
            model: self.config.model.clone(),
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature: Some(clamp_temperature("anthropic", temperature).min(1.0)),
            stream: false,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeClient {
    fn vendor(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation> {
        let url = format!("{}/v1/messages", self.config.endpoint());
        let body = self.build_request(prompt, temperature, max_tokens);

        debug!(vendor = "anthropic", model = %self.config.model, "sending message");
        let request = self.authorized(self.client.post(&url)).json(&body);
        let response: ClaudeResponse = send_json("anthropic", request).await?;

        if let Some(error) = response.error {
            return Err(LlmError::rejected("anthropic", None, error.message));
        }

        let text: String = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if response.content.is_empty() {
            return Err(LlmError::protocol("anthropic", "response has no content blocks"));
        }

        Ok(Generation::new(text, normalize_usage(response.usage.as_ref())))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(LlmError::unsupported("anthropic", "embed"))
    }

    async fn ping(&self) -> Result<bool> {
        let url = format!("{}/v1/models", self.config.endpoint());
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!(vendor = "anthropic", error = %e, "ping failed");
                Ok(false)
            }
        }
    }
}

/// Input plus output tokens; missing counts are 0.
fn normalize_usage(usage: Option<&ClaudeUsage>) -> u64 {
    usage
        .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0))
        .unwrap_or(0)
}

// Claude API types
#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContent>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
    #[serde(default)]
    error: Option<ClaudeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorBody {
    message: String,
}
