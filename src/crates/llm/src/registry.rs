//! Provider registry: adapters keyed by provider id.
//!
//! Adapters are built once when the configuration is loaded. A provider whose
//! configuration is unusable does not prevent the registry from being built;
//! its error is kept and returned only when that provider is resolved.

use crate::adapter::ProviderAdapter;
use crate::config::{ProviderConfig, Vendor};
use crate::error::{LlmError, Result};
use crate::local::OllamaClient;
use crate::remote::{ClaudeClient, GeminiClient, OpenAiClient, QianfanClient};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Build the adapter for a provider configuration.
pub fn adapter_for(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    let config = config.clone();
    let adapter: Arc<dyn ProviderAdapter> = match config.vendor {
        Vendor::OpenAi => Arc::new(OpenAiClient::new(config)?),
        Vendor::Deepseek => Arc::new(OpenAiClient::compatible(config)?),
        Vendor::Anthropic => Arc::new(ClaudeClient::new(config)?),
        Vendor::Gemini => Arc::new(GeminiClient::new(config)?),
        Vendor::Ollama => Arc::new(OllamaClient::new(config)?),
        Vendor::Qianfan => Arc::new(QianfanClient::new(config)?),
    };
    Ok(adapter)
}

enum Slot {
    Ready(Arc<dyn ProviderAdapter>),
    Broken(LlmError),
}

struct Entry {
    config: ProviderConfig,
    slot: Slot,
}

/// Adapters keyed by provider id.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configuration. Never fails: broken
    /// configurations are recorded and reported by [`resolve`](Self::resolve).
    pub fn from_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let mut registry = Self::new();
        for config in configs {
            let slot = match adapter_for(&config) {
                Ok(adapter) => {
                    debug!(provider = %config.id, vendor = %config.vendor, "provider registered");
                    Slot::Ready(adapter)
                }
                Err(e) => {
                    warn!(provider = %config.id, error = %e, "provider configuration unusable");
                    Slot::Broken(e)
                }
            };
            registry.insert(config, slot);
        }
        registry
    }

    /// Register a prebuilt adapter under `config.id`, replacing any existing
    /// entry.
    pub fn with_adapter(mut self, config: ProviderConfig, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(config, Slot::Ready(adapter));
        self
    }

    fn insert(&mut self, config: ProviderConfig, slot: Slot) {
        let id = config.id.clone();
        if self.entries.insert(id.clone(), Entry { config, slot }).is_none() {
            self.order.push(id);
        }
    }

    /// Adapter for an active provider, or the configuration error recorded
    /// for it.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        let entry = self.entries.get(id).ok_or_else(|| {
            LlmError::configuration("registry", format!("unknown provider '{}'", id))
        })?;
        if !entry.config.is_active {
            return Err(LlmError::configuration(
                entry.config.vendor.as_str(),
                format!("provider '{}' is inactive", id),
            ));
        }
        match &entry.slot {
            Slot::Ready(adapter) => Ok(adapter.clone()),
            Slot::Broken(e) => Err(e.clone()),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Provider ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn config(&self, id: &str) -> Option<&ProviderConfig> {
        self.entries.get(id).map(|e| &e.config)
    }

    pub fn configs(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.order.iter().filter_map(|id| self.config(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
