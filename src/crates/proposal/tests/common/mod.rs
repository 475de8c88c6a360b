//! Common test utilities: scripted provider adapters and service setup

#![allow(dead_code)]

use async_trait::async_trait;
use llm::{Generation, LlmError, ProviderAdapter, ProviderConfig, ProviderRegistry, Vendor};
use proposal::{
    ContextBuilder, Generator, InMemoryMetrics, MemoryStore, NoReferences, ProposalService,
    ProviderStore, ReferenceSource, VersionStore,
};
use result_cache::{CacheConfig, ResultCache};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail(LlmError),
    Delay(Duration),
}

/// Adapter that answers every section with a fixed text and records prompts
pub struct MockAdapter {
    model: String,
    behavior: Behavior,
    pub call_count: Arc<Mutex<usize>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    pub fn new(model: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            model: model.into(),
            behavior,
            call_count: Arc::new(Mutex::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn vendor(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> llm::Result<Generation> {
        let call = {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            *count
        };
        self.prompts.lock().unwrap().push(prompt.to_string());

        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(e) => return Err(e.clone()),
            Behavior::Delay(d) => tokio::time::sleep(*d).await,
        }
        Ok(Generation::new(format!("Section {} by {}.", call, self.model), 10))
    }

    async fn embed(&self, _text: &str) -> llm::Result<Vec<f32>> {
        Err(LlmError::unsupported("mock", "embed"))
    }
}

pub struct Harness {
    pub service: ProposalService,
    pub versions: Arc<dyn VersionStore>,
    pub usage: Arc<dyn ProviderStore>,
    pub metrics: Arc<InMemoryMetrics>,
    pub cache: Arc<ResultCache>,
}

/// Register adapters under their ids, all against the given store
pub fn harness_with_store<S>(store: Arc<S>, adapters: Vec<(&str, Arc<MockAdapter>)>) -> Harness
where
    S: VersionStore + ProviderStore + 'static,
{
    harness_with_registry(store, registry_of(adapters))
}

pub fn harness_with_registry<S>(store: Arc<S>, registry: ProviderRegistry) -> Harness
where
    S: VersionStore + ProviderStore + 'static,
{
    build_harness(store, registry, Arc::new(NoReferences))
}

/// In-memory harness whose context comes from `source`
pub fn harness_with_references(
    source: Arc<dyn ReferenceSource>,
    adapters: Vec<(&str, Arc<MockAdapter>)>,
) -> Harness {
    build_harness(Arc::new(MemoryStore::new()), registry_of(adapters), source)
}

fn registry_of(adapters: Vec<(&str, Arc<MockAdapter>)>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (id, adapter) in adapters {
        let config = ProviderConfig::new(id, Vendor::Ollama, adapter.model().to_string());
        registry = registry.with_adapter(config, adapter);
    }
    registry
}

fn build_harness<S>(store: Arc<S>, registry: ProviderRegistry, source: Arc<dyn ReferenceSource>) -> Harness
where
    S: VersionStore + ProviderStore + 'static,
{
    let cache = Arc::new(ResultCache::local(&CacheConfig::default()));
    let metrics = Arc::new(InMemoryMetrics::new());
    let context = ContextBuilder::new(source).with_cache(cache.clone());
    let generator = Generator::new(context, metrics.clone()).with_provider_store(store.clone());
    let service = ProposalService::new(
        Arc::new(registry),
        store.clone(),
        Arc::new(generator),
        cache.clone(),
    );
    Harness {
        service,
        versions: store.clone(),
        usage: store,
        metrics,
        cache,
    }
}

pub fn harness(adapters: Vec<(&str, Arc<MockAdapter>)>) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), adapters)
}

pub fn ok(model: &str) -> Arc<MockAdapter> {
    Arc::new(MockAdapter::new(model, Behavior::Succeed))
}

pub fn failing(model: &str, error: LlmError) -> Arc<MockAdapter> {
    Arc::new(MockAdapter::new(model, Behavior::Fail(error)))
}

pub fn slow(model: &str, delay: Duration) -> Arc<MockAdapter> {
    Arc::new(MockAdapter::new(model, Behavior::Delay(delay)))
}
