//! Error types for provider adapters.
//!
//! Every vendor failure is folded into one taxonomy. Each variant carries the
//! vendor name and the raw vendor message so callers can attribute a failure
//! without knowing which wire format produced it.

use thiserror::Error;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Maximum length of the diagnostic produced by [`LlmError::summary`].
const SUMMARY_MAX_CHARS: usize = 300;

/// Errors that can occur when calling a provider.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Missing credential/endpoint or otherwise unusable provider configuration.
    /// Raised before any network call.
    #[error("{vendor}: configuration error: {message}")]
    Configuration { vendor: String, message: String },

    /// The call did not finish within the configured timeout.
    #[error("{vendor}: request timed out: {message}")]
    Timeout { vendor: String, message: String },

    /// The vendor answered, but the body could not be understood.
    #[error("{vendor}: malformed response: {message}")]
    Protocol { vendor: String, message: String },

    /// The vendor reported a failure (quota, auth, invalid request, 5xx...).
    #[error("{vendor}: request rejected{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Rejected {
        vendor: String,
        status: Option<u16>,
        message: String,
    },

    /// The vendor could not be reached at all.
    #[error("{vendor}: service unavailable: {message}")]
    Unavailable { vendor: String, message: String },

    /// The adapter does not support the requested capability.
    #[error("{vendor}: {operation} is not supported")]
    Unsupported { vendor: String, operation: String },
}

impl LlmError {
    pub fn configuration(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Configuration {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn timeout(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Timeout {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn protocol(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Protocol {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn rejected(vendor: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        LlmError::Rejected {
            vendor: vendor.into(),
            status,
            message: message.into(),
        }
    }

    pub fn unavailable(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Unavailable {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(vendor: impl Into<String>, operation: impl Into<String>) -> Self {
        LlmError::Unsupported {
            vendor: vendor.into(),
            operation: operation.into(),
        }
    }

    /// Map a transport-level `reqwest` failure for `vendor`.
    pub fn from_reqwest(vendor: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::timeout(vendor, err.to_string())
        } else if err.is_decode() {
            LlmError::protocol(vendor, err.to_string())
        } else if err.is_connect() || err.is_request() {
            LlmError::unavailable(vendor, err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::rejected(vendor, Some(status.as_u16()), err.to_string())
        } else {
            LlmError::unavailable(vendor, err.to_string())
        }
    }

    /// Name of the vendor that produced this error.
    pub fn vendor(&self) -> &str {
        match self {
            LlmError::Configuration { vendor, .. }
            | LlmError::Timeout { vendor, .. }
            | LlmError::Protocol { vendor, .. }
            | LlmError::Rejected { vendor, .. }
            | LlmError::Unavailable { vendor, .. }
            | LlmError::Unsupported { vendor, .. } => vendor,
        }
    }

    /// Short label of the error class, used in metrics and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Configuration { .. } => "configuration",
            LlmError::Timeout { .. } => "timeout",
            LlmError::Protocol { .. } => "protocol",
            LlmError::Rejected { .. } => "rejected",
            LlmError::Unavailable { .. } => "unavailable",
            LlmError::Unsupported { .. } => "unsupported",
        }
    }

    /// Check if this error is worth retrying for idempotent calls.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout { .. } | LlmError::Unavailable { .. } => true,
            LlmError::Rejected { status, .. } => {
                matches!(status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, LlmError::Rejected { status: Some(401 | 403), .. })
    }

    /// One-line, vendor-attributed diagnostic bounded in length.
    pub fn summary(&self) -> String {
        let flat = self.to_string().replace(['\n', '\r'], " ");
        if flat.chars().count() > SUMMARY_MAX_CHARS {
            let cut: String = flat.chars().take(SUMMARY_MAX_CHARS).collect();
            format!("{}...", cut)
        } else {
            flat
        }
    }
}
