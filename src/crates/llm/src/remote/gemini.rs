//! Google Gemini adapter (`generateContent` and `embedContent`).

use crate::adapter::{clamp_temperature, Generation, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{build_http_client, send_json};
use crate::retry::retry_embedding;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const EMBEDDING_MODEL: &str = "text-embedding-004";

/// Google Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: ProviderConfig,
    api_key: String,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with the given configuration.
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

    fn build_request(&self, prompt: &str, temperature: f32, max_tokens: u32) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiMessage {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: Some(GeminiGenerationConfig {
                temperature: Some(clamp_temperature("gemini", temperature)),
                max_output_tokens: (max_tokens > 0).then_some(max_tokens),
                top_p: Some(self.config.defaults.top_p),
            }),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/models/{}:embedContent",
            self.config.endpoint(),
            EMBEDDING_MODEL
        );
        let body = GeminiEmbedRequest {
            content: GeminiMessage {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
        };
        let request = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body);
        let response: GeminiEmbedResponse = send_json("gemini", request).await?;
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiClient {
    fn vendor(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation> {
        // base_url/models/{model}:generateContent
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint(),
            self.config.model
        );
        let body = self.build_request(prompt, temperature, max_tokens);

        debug!(vendor = "gemini", model = %self.config.model, "sending generateContent");
        // Gemini uses the API key as a query parameter
        let request = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body);
        let response: GeminiResponse = send_json("gemini", request).await?;

        if let Some(feedback) = response.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return Err(LlmError::rejected(
                "gemini",
                None,
                format!("prompt blocked: {}", feedback),
            ));
        }

        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| LlmError::protocol("gemini", "response has no candidates"))?;
        let text: String = candidate
            .content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();

        Ok(Generation::new(text, normalize_usage(response.usage_metadata.as_ref())))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        retry_embedding("gemini", self.config.connection.max_retries, || self.embed_once(text)).await
    }

    async fn ping(&self) -> Result<bool> {
        let url = format!("{}/models", self.config.endpoint());
        match self.client.get(&url).query(&[("key", &self.api_key)]).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!(vendor = "gemini", error = %e, "ping failed");
                Ok(false)
            }
        }
    }
}

/// `totalTokenCount`, or prompt plus candidates; missing counts are 0.
fn normalize_usage(usage: Option<&GeminiUsageMetadata>) -> u64 {
    match usage {
        Some(u) => u.total_token_count.unwrap_or_else(|| {
            u.prompt_token_count.unwrap_or(0) + u.candidates_token_count.unwrap_or(0)
        }),
        None => 0,
    }
}

// Gemini API types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct GeminiEmbedRequest {
    content: GeminiMessage,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}
