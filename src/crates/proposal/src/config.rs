//! Application configuration
//!
//! Loaded from a TOML file. `${VAR}` and `${VAR:default}` references are
//! replaced with environment values before the document is parsed, so they
//! can stand in for numbers and booleans as well as strings.

use crate::error::{ProposalError, Result};
use crate::fanout::FanoutSettings;
use crate::generator::GenerationSettings;
use llm::ProviderConfig;
use regex::Regex;
use result_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite:bidwright.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub generation: GenerationSettings,

    #[serde(default)]
    pub fanout: FanoutSettings,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// Parsed configuration with environment references expanded
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ProposalError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env(content)?;
        let config: AppConfig = toml::from_str(&expanded)
            .map_err(|e| ProposalError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate provider ids and unusable limits. Provider-specific
    /// problems such as a missing key are reported when that provider is
    /// selected, not here.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(ProposalError::Config("provider id must not be empty".into()));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(ProposalError::Config(format!(
                    "provider '{}' is defined twice",
                    provider.id
                )));
            }
        }
        if self.fanout.max_providers == 0 {
            return Err(ProposalError::Config("fanout.max_providers must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ProposalError::Config(format!(
                "generation.temperature must be within [0, 2], got {}",
                self.generation.temperature
            )));
        }
        Ok(())
    }
}

/// Replace `${VAR}` and `${VAR:default}` with the environment value, the
/// default, or an empty string.
fn expand_env(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}")
        .map_err(|e| ProposalError::Config(format!("invalid interpolation pattern: {}", e)))?;

    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::Vendor;
    use std::io::Write;

    #[test]
    fn test_defaults_for_empty_document() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.database.url, "sqlite:bidwright.db");
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.cache.key_hash_threshold, 200);
        assert_eq!(config.generation.max_references, 3);
        assert_eq!(config.generation.max_excerpt_chars, 500);
        assert_eq!(config.fanout.max_providers, 3);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_env_interpolation_with_defaults() {
        env::set_var("BIDWRIGHT_TEST_OPENAI_KEY", "sk-test");
        env::remove_var("BIDWRIGHT_TEST_UNSET_TIMEOUT");

        let config = AppConfig::from_toml_str(
            r#"
            [database]
            url = "${BIDWRIGHT_TEST_UNSET_DB:sqlite::memory:}"

            [fanout]
            max_providers = ${BIDWRIGHT_TEST_UNSET_MAX:2}

            [[providers]]
            id = "gpt"
            vendor = "openai"
            model = "gpt-4o-mini"

            [providers.connection]
            api_key = "${BIDWRIGHT_TEST_OPENAI_KEY}"
            timeout_secs = ${BIDWRIGHT_TEST_UNSET_TIMEOUT:45}
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.fanout.max_providers, 2);
        let provider = &config.providers[0];
        assert_eq!(provider.vendor, Vendor::OpenAi);
        assert_eq!(provider.connection.api_key.as_deref(), Some("sk-test"));
        assert_eq!(provider.connection.timeout_secs, 45);
        assert!(provider.is_active);
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [[providers]]
            id = "a"
            vendor = "ollama"
            model = "llama3"

            [[providers]]
            id = "a"
            vendor = "gemini"
            model = "gemini-1.5-flash"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [generation]
            temperature = 0.2
            max_tokens_per_section = 512

            [cache]
            redis_url = "redis://localhost:6379"
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.max_tokens_per_section, 512);
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://localhost:6379"));

        assert!(AppConfig::load("/nonexistent/bidwright.toml").is_err());
    }
}
