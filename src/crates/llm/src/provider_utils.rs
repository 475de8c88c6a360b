//! HTTP plumbing shared by the vendor adapters.

use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Build the HTTP client for a provider, honoring its timeout.
pub fn build_http_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| {
            LlmError::configuration(
                config.vendor.as_str(),
                format!("failed to create HTTP client: {}", e),
            )
        })
}

/// Send a request and decode a JSON body, mapping every failure mode to
/// [`LlmError`].
pub async fn send_json<T: DeserializeOwned>(vendor: &str, request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::from_reqwest(vendor, e))?;
    read_json(vendor, response).await
}

/// Decode a response body, turning non-success statuses into `Rejected`.
pub async fn read_json<T: DeserializeOwned>(vendor: &str, response: Response) -> Result<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| LlmError::from_reqwest(vendor, e))?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        return Err(LlmError::rejected(
            vendor,
            Some(status.as_u16()),
            error_message(&text),
        ));
    }

    serde_json::from_slice(&body).map_err(|e| LlmError::protocol(vendor, e.to_string()))
}

/// Extract a readable message from a vendor error body.
///
/// Understands the common envelopes: `{"error": {"message": ..}}`,
/// `{"error": ".."}`, `{"error_msg": ..}` and `{"message": ..}`. Anything
/// else is returned verbatim.
pub fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| v.get("error").and_then(Value::as_str))
            .or_else(|| v.get("error_msg").and_then(Value::as_str))
            .or_else(|| v.get("message").and_then(Value::as_str))
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "empty error body".to_string(),
        None => body.trim().to_string(),
    }
}
