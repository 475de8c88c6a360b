use super::{check_rating, check_transition, outcome_status, ProviderStore, VersionStore};
use crate::error::{ProposalError, Result};
use crate::model::{SubjectId, VersionId, VersionOutcome, VersionRecord, VersionStatus};
use async_trait::async_trait;
use chrono::Utc;
use llm::UsageCounters;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    versions: HashMap<VersionId, VersionRecord>,
    order: Vec<VersionId>,
    allocations: HashSet<(SubjectId, i64)>,
    usage: HashMap<String, UsageCounters>,
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: VersionId, f: F) -> Result<VersionRecord>
    where
        F: FnOnce(&mut VersionRecord) -> Result<()> + Send,
    {
        let mut inner = self.inner.write().await;
        let record = inner
            .versions
            .get_mut(&id)
            .ok_or_else(|| ProposalError::not_found(format!("version {}", id)))?;
        f(record)?;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn max_version_number(&self, subject_id: SubjectId) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .allocations
            .iter()
            .filter(|(s, _)| *s == subject_id)
            .map(|(_, n)| *n)
            .max()
            .unwrap_or(0))
    }

    async fn reserve_version_number(&self, subject_id: SubjectId, version_number: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.allocations.insert((subject_id, version_number)) {
            Ok(())
        } else {
            Err(ProposalError::VersionConflict {
                subject_id,
                version_number,
            })
        }
    }

    async fn create(&self, record: &VersionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner
            .allocations
            .contains(&(record.subject_id, record.version_number))
        {
            return Err(ProposalError::storage(format!(
                "version {} of subject {} was never reserved",
                record.version_number, record.subject_id
            )));
        }
        if let Some(parent) = record.parent_version_id {
            if !inner.versions.contains_key(&parent) {
                return Err(ProposalError::not_found(format!("parent version {}", parent)));
            }
        }
        if inner.versions.contains_key(&record.id) {
            return Err(ProposalError::storage(format!("version {} already exists", record.id)));
        }
        inner.versions.insert(record.id, record.clone());
        inner.order.push(record.id);
        Ok(())
    }

    async fn get(&self, id: VersionId) -> Result<Option<VersionRecord>> {
        Ok(self.inner.read().await.versions.get(&id).cloned())
    }

    async fn list_for_subject(&self, subject_id: SubjectId) -> Result<Vec<VersionRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<VersionRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.versions.get(id))
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect();
        // stable: keeps creation order within a version number
        records.sort_by_key(|r| r.version_number);
        Ok(records)
    }

    async fn finish(&self, id: VersionId, outcome: VersionOutcome) -> Result<VersionRecord> {
        self.update(id, |record| {
            check_transition(record, outcome_status(&outcome))?;
            record.apply(outcome);
            Ok(())
        })
        .await
    }

    async fn set_status(&self, id: VersionId, status: VersionStatus) -> Result<VersionRecord> {
        self.update(id, |record| {
            check_transition(record, status)?;
            record.status = status;
            Ok(())
        })
        .await
    }

    async fn set_rating(&self, id: VersionId, rating: u8) -> Result<VersionRecord> {
        check_rating(rating)?;
        self.update(id, |record| {
            record.user_rating = Some(rating);
            Ok(())
        })
        .await
    }

    async fn set_feedback(&self, id: VersionId, feedback: &str) -> Result<VersionRecord> {
        let feedback = feedback.to_string();
        self.update(id, move |record| {
            record.feedback = Some(feedback);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn record_usage(&self, provider_id: &str, success: bool, tokens: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .usage
            .entry(provider_id.to_string())
            .or_default()
            .record(success, tokens);
        Ok(())
    }

    async fn counters(&self, provider_id: &str) -> Result<UsageCounters> {
        Ok(self
            .inner
            .read()
            .await
            .usage
            .get(provider_id)
            .copied()
            .unwrap_or_default())
    }
}
