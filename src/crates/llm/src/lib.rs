//! Provider adapters for bidwright.
//!
//! Every vendor is wrapped behind the [`ProviderAdapter`] trait so callers can
//! generate text and embeddings without knowing the wire format:
//!
//! - **Remote**: OpenAI, Deepseek (OpenAI-compatible), Anthropic Claude,
//!   Google Gemini, Baidu Qianfan
//! - **Local**: Ollama
//!
//! Vendor failures are normalized into [`LlmError`]. Adapters are looked up by
//! provider id through the [`ProviderRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ProviderConfig, ProviderRegistry, Vendor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProviderRegistry::from_configs(vec![
//!         ProviderConfig::new("local", Vendor::Ollama, "llama3.1"),
//!     ]);
//!
//!     let adapter = registry.resolve("local")?;
//!     let generation = adapter.generate("What is Rust?", 0.7, 256).await?;
//!     println!("{} ({} tokens)", generation.text, generation.tokens_used);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod provider_utils;
pub mod registry;
pub mod retry;
pub mod token;

pub mod local;
pub mod remote;

// Re-export commonly used types
pub use adapter::{Generation, ProviderAdapter};
pub use config::{ConnectionParams, GenerationDefaults, ProviderConfig, UsageCounters, Vendor};
pub use error::{LlmError, Result};
pub use registry::{adapter_for, ProviderRegistry};
pub use retry::RetryConfig;
