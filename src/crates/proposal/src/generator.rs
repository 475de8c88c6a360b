//! Generation orchestrator
//!
//! Produces one proposal with one provider: builds the shared context, then
//! issues one adapter call per section in fixed order. Any failing section
//! aborts the whole generation; no partial document is returned.

use crate::context::{ContextBuilder, GenerationContext, GenerationInput};
use crate::error::{ProposalError, Result};
use crate::metrics::{CallStatus, MetricsSink};
use crate::model::{ContentSnapshot, Section};
use crate::store::ProviderStore;
use llm::ProviderAdapter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tunables of the orchestrator, loaded from the `[generation]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output limit of each section call; 0 leaves it to the vendor.
    #[serde(default = "default_max_tokens_per_section")]
    pub max_tokens_per_section: u32,

    #[serde(default = "default_max_references")]
    pub max_references: usize,

    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens_per_section() -> u32 {
    1024
}

fn default_max_references() -> usize {
    crate::context::DEFAULT_MAX_REFERENCES
}

fn default_max_excerpt_chars() -> usize {
    crate::context::DEFAULT_MAX_EXCERPT_CHARS
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens_per_section: default_max_tokens_per_section(),
            max_references: default_max_references(),
            max_excerpt_chars: default_max_excerpt_chars(),
        }
    }
}

/// Result of one successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProposal {
    pub content: ContentSnapshot,
    pub tokens_used: u64,
    pub generation_secs: f64,
    /// Pricing tables are not generated; always `None`.
    pub pricing: Option<String>,
}

/// Section-by-section proposal generator
pub struct Generator {
    context: ContextBuilder,
    metrics: Arc<dyn MetricsSink>,
    usage: Option<Arc<dyn ProviderStore>>,
    temperature: f32,
    max_tokens_per_section: u32,
}

impl Generator {
    /// Create a generator with default settings
    ///
    /// # Arguments
    /// * `context` - Builder for the shared section context
    /// * `metrics` - Sink receiving one sample per provider call
    pub fn new(context: ContextBuilder, metrics: Arc<dyn MetricsSink>) -> Self {
        let settings = GenerationSettings::default();
        Self {
            context,
            metrics,
            usage: None,
            temperature: settings.temperature,
            max_tokens_per_section: settings.max_tokens_per_section,
        }
    }

    /// Update provider lifetime counters after every call
    pub fn with_provider_store(mut self, store: Arc<dyn ProviderStore>) -> Self {
        self.usage = Some(store);
        self
    }

    /// Apply temperature and per-section token limit from `settings`
    pub fn with_settings(mut self, settings: &GenerationSettings) -> Self {
        self.temperature = settings.temperature;
        self.max_tokens_per_section = settings.max_tokens_per_section;
        self
    }

    /// Prompt for one section: its instruction followed by the shared context.
    pub fn section_prompt(section: Section, context: &GenerationContext) -> String {
        format!(
            "{}\n\nUse plain prose. Respond with the {} text only, without a heading.\n\n{}",
            section.instruction(),
            section.title().to_lowercase(),
            context.render()
        )
    }

    /// Context for `input`, built once and shareable across providers.
    pub async fn build_context(&self, input: &GenerationInput) -> GenerationContext {
        self.context.build(input).await
    }

    /// Generate a full proposal with one provider
    ///
    /// # Arguments
    /// * `provider_id` - Configured provider id, used for metrics and usage counters
    /// * `adapter` - Adapter of that provider
    /// * `input` - Subject, requirements and optional iteration context
    ///
    /// # Returns
    /// The assembled proposal, or the first section failure
    pub async fn generate(
        &self,
        provider_id: &str,
        adapter: &dyn ProviderAdapter,
        input: &GenerationInput,
    ) -> Result<GeneratedProposal> {
        let context = self.build_context(input).await;
        self.generate_with_context(provider_id, adapter, &context).await
    }

    /// Generate a full proposal from an already built context.
    pub async fn generate_with_context(
        &self,
        provider_id: &str,
        adapter: &dyn ProviderAdapter,
        context: &GenerationContext,
    ) -> Result<GeneratedProposal> {
        let started = Instant::now();

        let mut content = ContentSnapshot::default();
        let mut tokens_used = 0u64;

        for section in Section::ORDER {
            let prompt = Self::section_prompt(section, context);
            let call_started = Instant::now();
            let result = adapter
                .generate(&prompt, self.temperature, self.max_tokens_per_section)
                .await;
            let duration_secs = call_started.elapsed().as_secs_f64();

            match result {
                Ok(generation) => {
                    self.report(provider_id, adapter, CallStatus::Success, duration_secs, generation.tokens_used)
                        .await;
                    debug!(
                        provider = provider_id,
                        subject_id = context.subject_id,
                        section = section.key(),
                        duration_ms = (duration_secs * 1000.0) as u64,
                        tokens = generation.tokens_used,
                        "section generated"
                    );
                    tokens_used += generation.tokens_used;
                    content.set_section(section, generation.text.trim().to_string());
                }
                Err(source) => {
                    self.report(provider_id, adapter, CallStatus::Failure, duration_secs, 0)
                        .await;
                    warn!(
                        provider = provider_id,
                        subject_id = context.subject_id,
                        section = section.key(),
                        error = %source,
                        "section generation failed"
                    );
                    return Err(ProposalError::Section { section, source });
                }
            }
        }

        content.assemble_full_text();
        let generation_secs = started.elapsed().as_secs_f64();
        info!(
            provider = provider_id,
            subject_id = context.subject_id,
            duration_ms = (generation_secs * 1000.0) as u64,
            tokens = tokens_used,
            "proposal generated"
        );

        Ok(GeneratedProposal {
            content,
            tokens_used,
            generation_secs,
            pricing: None,
        })
    }

    async fn report(
        &self,
        provider_id: &str,
        adapter: &dyn ProviderAdapter,
        status: CallStatus,
        duration_secs: f64,
        tokens: u64,
    ) {
        self.metrics
            .record(provider_id, adapter.model(), status, duration_secs, tokens);
        if let Some(usage) = &self.usage {
            if let Err(e) = usage
                .record_usage(provider_id, status == CallStatus::Success, tokens)
                .await
            {
                warn!(provider = provider_id, error = %e, "failed to update provider usage");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoReferences;
    use crate::metrics::InMemoryMetrics;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use llm::{Generation, LlmError};
    use parking_lot::Mutex;

    /// Answers each call with the next scripted reply.
    struct ScriptedAdapter {
        replies: Mutex<Vec<llm::Result<Generation>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(mut replies: Vec<llm::Result<Generation>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn vendor(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "script-1"
        }

        async fn generate(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> llm::Result<Generation> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop()
                .unwrap_or_else(|| Err(LlmError::protocol("scripted", "no reply left")))
        }

        async fn embed(&self, _text: &str) -> llm::Result<Vec<f32>> {
            Err(LlmError::unsupported("scripted", "embed"))
        }
    }

    fn generator(metrics: Arc<InMemoryMetrics>, store: Arc<MemoryStore>) -> Generator {
        Generator::new(ContextBuilder::new(Arc::new(NoReferences)), metrics).with_provider_store(store)
    }

    #[tokio::test]
    async fn test_sections_in_order_and_empty_ones_skipped() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(Generation::new("Summary.", 10)),
            Ok(Generation::new("  ", 0)),
            Ok(Generation::new("Details.", 20)),
            Ok(Generation::new("Plan.", 5)),
        ]);
        let metrics = Arc::new(InMemoryMetrics::new());
        let store = Arc::new(MemoryStore::new());

        let proposal = generator(metrics.clone(), store.clone())
            .generate("p1", &adapter, &GenerationInput::new(1, "Migrate CRM"))
            .await
            .unwrap();

        assert_eq!(proposal.content.executive_summary, "Summary.");
        assert_eq!(proposal.content.solution_overview, "");
        assert_eq!(proposal.content.full_text, "Summary.\n\nDetails.\n\nPlan.");
        assert_eq!(proposal.tokens_used, 35);
        assert_eq!(proposal.pricing, None);

        let prompts = adapter.prompts.lock();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[0].starts_with(Section::ExecutiveSummary.instruction()));
        assert!(prompts[3].starts_with(Section::ImplementationPlan.instruction()));
        assert!(prompts.iter().all(|p| p.contains("Migrate CRM")));
        drop(prompts);

        assert_eq!(metrics.get("p1", "script-1").unwrap().calls, 4);
        let counters = store.counters("p1").await.unwrap();
        assert_eq!(counters.total_calls, 4);
        assert_eq!(counters.tokens_consumed, 35);
    }

    #[tokio::test]
    async fn test_section_failure_aborts() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(Generation::new("Summary.", 10)),
            Err(LlmError::rejected("scripted", Some(429), "quota exceeded")),
        ]);
        let metrics = Arc::new(InMemoryMetrics::new());
        let store = Arc::new(MemoryStore::new());

        let err = generator(metrics.clone(), store.clone())
            .generate("p1", &adapter, &GenerationInput::new(1, "Migrate CRM"))
            .await
            .unwrap_err();

        match err {
            ProposalError::Section { section, source } => {
                assert_eq!(section, Section::SolutionOverview);
                assert!(source.to_string().contains("quota exceeded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(adapter.prompts.lock().len(), 2);

        let stats = metrics.get("p1", "script-1").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 1);
        let counters = store.counters("p1").await.unwrap();
        assert_eq!(counters.successful_calls, 1);
        assert_eq!(counters.total_calls, 2);
    }
}
