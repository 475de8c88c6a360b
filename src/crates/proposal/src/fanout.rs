//! Multi-provider fan-out
//!
//! [`ProposalService`] runs one generation per requested provider
//! concurrently and tracks every candidate as a version record. All records
//! of one call share a version number. Each task owns its record: a failing
//! provider marks its own record failed and never touches its siblings.

use crate::context::{GenerationContext, GenerationInput};
use crate::diff::{diff_structured, StructuredDiff};
use crate::error::{ProposalError, Result};
use crate::generator::Generator;
use crate::model::{
    ComparisonSummary, GenerationRequest, NewVersion, SubjectId, VersionId, VersionOutcome,
    VersionRecord, VersionStatus,
};
use crate::store::VersionStore;
use futures::future::join_all;
use llm::ProviderRegistry;
use parking_lot::Mutex;
use result_cache::{subject_key, subject_pattern, ResultCache};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Most versions accepted by one `compare` call.
pub const MAX_COMPARE_VERSIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutSettings {
    /// Most providers accepted by one fan-out call.
    #[serde(default = "default_max_providers")]
    pub max_providers: usize,
}

fn default_max_providers() -> usize {
    3
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_providers: default_max_providers(),
        }
    }
}

/// Subject-scoped cache entries plus a per-subject epoch.
///
/// Every invalidation bumps the subject's epoch before clearing its keys. A
/// reader that loaded data under an older epoch never leaves it in the cache.
struct SubjectCache {
    cache: Arc<ResultCache>,
    epochs: Mutex<HashMap<SubjectId, u64>>,
}

impl SubjectCache {
    fn new(cache: Arc<ResultCache>) -> Self {
        Self {
            cache,
            epochs: Mutex::new(HashMap::new()),
        }
    }

    fn epoch(&self, subject_id: SubjectId) -> u64 {
        self.epochs.lock().get(&subject_id).copied().unwrap_or(0)
    }

    async fn invalidate(&self, subject_id: SubjectId) {
        *self.epochs.lock().entry(subject_id).or_insert(0) += 1;
        let removed = self.cache.clear_pattern(&subject_pattern(subject_id)).await;
        debug!(subject_id, removed, "subject cache invalidated");
    }

    /// Cache `value` under `key` unless the subject was invalidated since
    /// `epoch` was read.
    async fn fill<T: Serialize + Sync>(&self, subject_id: SubjectId, epoch: u64, key: &str, value: &T) {
        if self.epoch(subject_id) != epoch {
            debug!(subject_id, key, "skipping cache fill, subject changed while loading");
            return;
        }
        self.cache.set_json(key, value, None).await;
        // an invalidation may have run between the check and the write
        if self.epoch(subject_id) != epoch {
            self.cache.delete(key).await;
        }
    }
}

/// Entry point for generating, iterating on and inspecting proposal versions.
pub struct ProposalService {
    registry: Arc<ProviderRegistry>,
    versions: Arc<dyn VersionStore>,
    generator: Arc<Generator>,
    subjects: Arc<SubjectCache>,
    max_providers: usize,
}

impl ProposalService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        versions: Arc<dyn VersionStore>,
        generator: Arc<Generator>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            registry,
            versions,
            generator,
            subjects: Arc::new(SubjectCache::new(cache)),
            max_providers: default_max_providers(),
        }
    }

    pub fn with_settings(mut self, settings: &FanoutSettings) -> Self {
        self.max_providers = settings.max_providers.max(1);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.subjects.cache
    }

    /// Generate one candidate per provider under a fresh version number.
    ///
    /// Records are created in `generating` state before any provider is
    /// called, then each provider runs in its own spawned task. Dropping the
    /// returned future does not cancel running tasks. The result holds one
    /// record per requested provider, in request order, each either completed
    /// or failed.
    pub async fn fan_out_generate(&self, request: GenerationRequest) -> Result<Vec<VersionRecord>> {
        let parent = self.validate(&request).await?;
        let subject_id = request.subject_id;

        // One reference lookup per fan-out, done before anything is persisted.
        let input = GenerationInput {
            subject_id,
            requirements: request.requirements.clone(),
            previous: parent.map(|p| p.content).filter(|c| !c.is_empty()),
            feedback: request.feedback.clone().filter(|f| !f.trim().is_empty()),
        };
        let context = Arc::new(self.generator.build_context(&input).await);

        let version_number = self.allocate_version_number(subject_id).await?;

        let mut records = Vec::with_capacity(request.provider_ids.len());
        for provider_id in &request.provider_ids {
            let model_id = self
                .registry
                .config(provider_id)
                .map(|c| c.model.clone())
                .unwrap_or_default();
            let record = VersionRecord::generating(NewVersion {
                subject_id,
                version_number,
                requirements: request.requirements.clone(),
                provider_id: provider_id.clone(),
                model_id,
                parent_version_id: request.parent_version_id,
            });
            self.versions.create(&record).await?;
            records.push(record);
        }
        self.invalidate(subject_id).await;

        info!(
            subject_id,
            version_number,
            providers = ?request.provider_ids,
            "fan-out started"
        );

        let handles: Vec<_> = records
            .iter()
            .map(|record| {
                tokio::spawn(run_task(
                    self.registry.clone(),
                    self.generator.clone(),
                    self.versions.clone(),
                    self.subjects.clone(),
                    record.clone(),
                    context.clone(),
                ))
            })
            .collect();

        let mut finished = Vec::with_capacity(records.len());
        for (record, joined) in records.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => {
                    error!(version_id = %record.id, provider = %record.provider_id, error = %e, "generation task died");
                    let outcome = VersionOutcome::Failed {
                        error_message: format!("generation task aborted: {}", e),
                        generation_secs: 0.0,
                    };
                    finished.push(persist_outcome(self.versions.as_ref(), record, outcome).await);
                }
            }
        }
        self.invalidate(subject_id).await;

        let completed = finished
            .iter()
            .filter(|r| r.status == VersionStatus::Completed)
            .count();
        info!(
            subject_id,
            version_number,
            completed,
            failed = finished.len() - completed,
            "fan-out finished"
        );
        Ok(finished)
    }

    /// Regenerate from an existing version with reviewer feedback.
    ///
    /// Requirements come from the parent record; the parent's content and the
    /// feedback are added to every section prompt. The feedback is stored on
    /// the parent once the new versions exist.
    pub async fn iterate(
        &self,
        parent_version_id: VersionId,
        feedback: &str,
        provider_ids: Vec<String>,
    ) -> Result<Vec<VersionRecord>> {
        let parent = self.get_version(parent_version_id).await?;
        let requirements = if parent.requirements.trim().is_empty() {
            parent.content.full_text.clone()
        } else {
            parent.requirements.clone()
        };

        let records = self
            .fan_out_generate(GenerationRequest {
                subject_id: parent.subject_id,
                requirements,
                provider_ids,
                parent_version_id: Some(parent.id),
                feedback: Some(feedback.to_string()),
            })
            .await?;

        if !feedback.trim().is_empty() {
            self.versions.set_feedback(parent.id, feedback.trim()).await?;
            self.invalidate(parent.subject_id).await;
        }
        Ok(records)
    }

    /// Redacted side-by-side summary of 2 to [`MAX_COMPARE_VERSIONS`] versions.
    pub async fn compare(&self, version_ids: &[VersionId]) -> Result<ComparisonSummary> {
        if version_ids.len() < 2 || version_ids.len() > MAX_COMPARE_VERSIONS {
            return Err(ProposalError::invalid(format!(
                "compare needs between 2 and {} versions, got {}",
                MAX_COMPARE_VERSIONS,
                version_ids.len()
            )));
        }
        let distinct: HashSet<_> = version_ids.iter().collect();
        if distinct.len() != version_ids.len() {
            return Err(ProposalError::invalid("compare received duplicate version ids"));
        }

        let mut records = Vec::with_capacity(version_ids.len());
        for id in version_ids {
            records.push(self.get_version(*id).await?);
        }
        ComparisonSummary::from_records(&records)
            .ok_or_else(|| ProposalError::invalid("nothing to compare"))
    }

    /// All versions of a subject, served from the cache when possible.
    pub async fn list_versions(&self, subject_id: SubjectId) -> Result<Vec<VersionRecord>> {
        let key = subject_key(subject_id, "versions");
        if let Some(cached) = self.subjects.cache.get_json::<Vec<VersionRecord>>(&key).await {
            return Ok(cached);
        }
        let epoch = self.subjects.epoch(subject_id);
        let records = self.versions.list_for_subject(subject_id).await?;
        self.subjects.fill(subject_id, epoch, &key, &records).await;
        Ok(records)
    }

    pub async fn get_version(&self, id: VersionId) -> Result<VersionRecord> {
        self.versions
            .get(id)
            .await?
            .ok_or_else(|| ProposalError::not_found(format!("version {}", id)))
    }

    /// Mark a completed version as the chosen one. Any other selected
    /// version of the same subject goes back to completed.
    pub async fn select_version(&self, id: VersionId) -> Result<VersionRecord> {
        let record = self.get_version(id).await?;
        match record.status {
            VersionStatus::Selected => return Ok(record),
            VersionStatus::Completed => {}
            other => {
                return Err(ProposalError::invalid(format!(
                    "only completed versions can be selected, version {} is {}",
                    id, other
                )))
            }
        }

        for previous in self.versions.list_for_subject(record.subject_id).await? {
            if previous.id != id && previous.status == VersionStatus::Selected {
                self.versions
                    .set_status(previous.id, VersionStatus::Completed)
                    .await?;
            }
        }
        let selected = self.versions.set_status(id, VersionStatus::Selected).await?;
        self.invalidate(record.subject_id).await;
        info!(subject_id = record.subject_id, version_id = %id, "version selected");
        Ok(selected)
    }

    pub async fn rate_version(&self, id: VersionId, rating: u8) -> Result<VersionRecord> {
        let rated = self.versions.set_rating(id, rating).await?;
        self.invalidate(rated.subject_id).await;
        Ok(rated)
    }

    /// The version and its ancestors, oldest first.
    pub async fn lineage(&self, id: VersionId) -> Result<Vec<VersionRecord>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(id);

        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(ProposalError::storage(format!(
                    "version {} appears twice in its own lineage",
                    current
                )));
            }
            let record = self.get_version(current).await?;
            next = record.parent_version_id;
            chain.push(record);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Field-level diff from version `old` to version `new`.
    pub async fn diff_versions(&self, old: VersionId, new: VersionId) -> Result<StructuredDiff> {
        let old = self.get_version(old).await?;
        let new = self.get_version(new).await?;
        Ok(diff_structured(&old.content.to_fields(), &new.content.to_fields()))
    }

    async fn validate(&self, request: &GenerationRequest) -> Result<Option<VersionRecord>> {
        let ids = &request.provider_ids;
        if ids.is_empty() {
            return Err(ProposalError::invalid("at least one provider is required"));
        }
        if ids.len() > self.max_providers {
            return Err(ProposalError::invalid(format!(
                "at most {} providers per request, got {}",
                self.max_providers,
                ids.len()
            )));
        }
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(ProposalError::invalid(format!("provider '{}' requested twice", id)));
            }
            if !self.registry.contains(id) {
                return Err(ProposalError::invalid(format!("unknown provider '{}'", id)));
            }
        }
        if request.requirements.trim().is_empty() {
            return Err(ProposalError::invalid("requirements must not be empty"));
        }

        match request.parent_version_id {
            None => Ok(None),
            Some(parent_id) => {
                let parent = self.versions.get(parent_id).await?.ok_or_else(|| {
                    ProposalError::not_found(format!("parent version {}", parent_id))
                })?;
                if parent.subject_id != request.subject_id {
                    return Err(ProposalError::invalid(format!(
                        "parent version {} belongs to subject {}, not {}",
                        parent_id, parent.subject_id, request.subject_id
                    )));
                }
                Ok(Some(parent))
            }
        }
    }

    /// Reserve `max + 1`, recomputing once if another writer got there first.
    async fn allocate_version_number(&self, subject_id: SubjectId) -> Result<i64> {
        let mut retried = false;
        loop {
            let candidate = self.versions.max_version_number(subject_id).await? + 1;
            match self
                .versions
                .reserve_version_number(subject_id, candidate)
                .await
            {
                Ok(()) => return Ok(candidate),
                Err(e) if e.is_conflict() && !retried => {
                    warn!(subject_id, version_number = candidate, "version number taken, retrying");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn invalidate(&self, subject_id: SubjectId) {
        self.subjects.invalidate(subject_id).await;
    }
}

async fn run_task(
    registry: Arc<ProviderRegistry>,
    generator: Arc<Generator>,
    versions: Arc<dyn VersionStore>,
    subjects: Arc<SubjectCache>,
    record: VersionRecord,
    context: Arc<GenerationContext>,
) -> VersionRecord {
    let started = Instant::now();
    let result = match registry.resolve(&record.provider_id) {
        Ok(adapter) => generator
            .generate_with_context(&record.provider_id, adapter.as_ref(), &context)
            .await,
        Err(e) => Err(ProposalError::Provider(e)),
    };

    let outcome = match result {
        Ok(proposal) => VersionOutcome::Completed {
            content: proposal.content,
            generation_secs: proposal.generation_secs,
            tokens_used: proposal.tokens_used,
        },
        Err(e) => {
            warn!(
                version_id = %record.id,
                provider = %record.provider_id,
                subject_id = record.subject_id,
                error = %e,
                "generation failed"
            );
            VersionOutcome::Failed {
                error_message: e.summary(),
                generation_secs: started.elapsed().as_secs_f64(),
            }
        }
    };

    let subject_id = record.subject_id;
    let finished = persist_outcome(versions.as_ref(), record, outcome).await;
    subjects.invalidate(subject_id).await;
    finished
}

async fn persist_outcome(
    versions: &dyn VersionStore,
    mut record: VersionRecord,
    outcome: VersionOutcome,
) -> VersionRecord {
    match versions.finish(record.id, outcome.clone()).await {
        Ok(updated) => updated,
        Err(e) => {
            error!(version_id = %record.id, error = %e, "failed to persist generation outcome");
            record.apply(outcome);
            record
        }
    }
}
