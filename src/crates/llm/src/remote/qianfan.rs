//! Baidu Qianfan (ERNIE) adapter.
//!
//! Qianfan exchanges an API key / secret key pair for an access token that
//! lives for about 30 days. The token is cached in a [`TokenCache`] and sent
//! as a query parameter. Qianfan reports most failures with HTTP 200 and an
//! `error_code` in the body.

use crate::adapter::{clamp_temperature, Generation, ProviderAdapter};
use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{build_http_client, send_json};
use crate::retry::retry_embedding;
use crate::token::{IssuedToken, TokenCache};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const CHAT_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/chat";
const EMBEDDING_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/embeddings/embedding-v1";
const TOKEN_PATH: &str = "/oauth/2.0/token";

/// Error codes meaning the access token is invalid or expired.
const TOKEN_ERROR_CODES: [i64; 2] = [110, 111];

/// Lifetime assumed for a token issued without `expires_in`.
const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Qianfan temperature must lie in (0, 1].
const MIN_QIANFAN_TEMPERATURE: f32 = 0.01;

/// Baidu Qianfan API client.
#[derive(Clone)]
pub struct QianfanClient {
    config: ProviderConfig,
    api_key: String,
    secret_key: String,
    client: Client,
    tokens: Arc<TokenCache>,
}

impl QianfanClient {
    /// Create a new Qianfan client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.require_api_key()?.to_string();
        let secret_key = config.require_secret_key()?.to_string();
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            api_key,
            secret_key,
            client,
            tokens: Arc::new(TokenCache::new()),
        })
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> Result<IssuedToken> {
        let url = format!("{}{}", self.config.endpoint(), TOKEN_PATH);
        let request = self.client.post(&url).query(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.api_key.as_str()),
            ("client_secret", self.secret_key.as_str()),
        ]);
        let response: TokenResponse = send_json("qianfan", request).await?;
        match (response.access_token, response.error) {
            (Some(token), None) => {
                let expires_in = match response.expires_in {
                    Some(secs) if secs > 0 => secs,
                    other => {
                        warn!(
                            vendor = "qianfan",
                            expires_in = ?other,
                            fallback_secs = FALLBACK_TOKEN_LIFETIME_SECS,
                            "token response without a usable lifetime"
                        );
                        FALLBACK_TOKEN_LIFETIME_SECS
                    }
                };
                Ok(IssuedToken { token, expires_in })
            }
            (_, Some(error)) => Err(LlmError::rejected(
                "qianfan",
                None,
                format!(
                    "token exchange failed: {}{}",
                    error,
                    response
                        .error_description
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                ),
            )),
            (None, None) => Err(LlmError::protocol("qianfan", "token response has no access_token")),
        }
    }

    /// Turn a body-level error envelope into an error, dropping the cached
    /// token when the vendor says it is no longer valid.
    async fn check_envelope(&self, code: Option<i64>, message: Option<String>) -> Result<()> {
        let Some(code) = code.filter(|c| *c != 0) else {
            return Ok(());
        };
        if TOKEN_ERROR_CODES.contains(&code) {
            warn!(vendor = "qianfan", code, "access token rejected, clearing cache");
            self.tokens.invalidate().await;
        }
        Err(LlmError::rejected(
            "qianfan",
            None,
            format!("error {}: {}", code, message.unwrap_or_default()),
        ))
    }

    fn build_request(&self, prompt: &str, temperature: f32, max_tokens: u32) -> QianfanRequest {
        QianfanRequest {
            messages: vec![QianfanMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: clamp_temperature("qianfan", temperature).clamp(MIN_QIANFAN_TEMPERATURE, 1.0),
            max_output_tokens: (max_tokens > 0).then_some(max_tokens),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.endpoint(), EMBEDDING_PATH);
        let request = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&QianfanEmbeddingRequest { input: vec![text] });
        let response: QianfanEmbeddingResponse = send_json("qianfan", request).await?;
        self.check_envelope(response.error_code, response.error_msg).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::protocol("qianfan", "embedding response has no data"))
    }
}

#[async_trait]
impl ProviderAdapter for QianfanClient {
    fn vendor(&self) -> &str {
        "qianfan"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<Generation> {
        let token = self.access_token().await?;
        let url = format!("{}{}/{}", self.config.endpoint(), CHAT_PATH, self.config.model);
        let body = self.build_request(prompt, temperature, max_tokens);

        debug!(vendor = "qianfan", model = %self.config.model, "sending chat request");
        let request = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&body);
        let response: QianfanResponse = send_json("qianfan", request).await?;
        self.check_envelope(response.error_code, response.error_msg).await?;

        let text = response
            .result
            .ok_or_else(|| LlmError::protocol("qianfan", "response has no result"))?;
        Ok(Generation::new(text, normalize_usage(response.usage.as_ref())))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        retry_embedding("qianfan", self.config.connection.max_retries, || self.embed_once(text)).await
    }

    async fn ping(&self) -> Result<bool> {
        // A successful token exchange proves both reachability and credentials.
        match self.access_token().await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(vendor = "qianfan", error = %e, "ping failed");
                Ok(false)
            }
        }
    }
}

/// `total_tokens`, or prompt plus completion; missing counts are 0.
fn normalize_usage(usage: Option<&QianfanUsage>) -> u64 {
    match usage {
        Some(u) => u
            .total_tokens
            .unwrap_or_else(|| u.prompt_tokens.unwrap_or(0) + u.completion_tokens.unwrap_or(0)),
        None => 0,
    }
}

// Qianfan API types
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct QianfanRequest {
    messages: Vec<QianfanMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct QianfanMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct QianfanResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    usage: Option<QianfanUsage>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QianfanUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Serialize)]
struct QianfanEmbeddingRequest<'a> {
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QianfanEmbeddingResponse {
    #[serde(default)]
    data: Vec<QianfanEmbedding>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QianfanEmbedding {
    embedding: Vec<f32>,
}
