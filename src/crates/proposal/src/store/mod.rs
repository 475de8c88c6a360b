//! Persistence interfaces for version records and provider usage.
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! embedding, and [`SqliteStore`] backed by `sqlx`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{ProposalError, Result};
use crate::model::{SubjectId, VersionId, VersionOutcome, VersionRecord, VersionStatus};
use async_trait::async_trait;
use llm::UsageCounters;

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Highest version number allocated for the subject, 0 when none.
    async fn max_version_number(&self, subject_id: SubjectId) -> Result<i64>;

    /// Atomically reserve `version_number` for the subject.
    ///
    /// Fails with [`ProposalError::VersionConflict`] if it is already taken.
    async fn reserve_version_number(&self, subject_id: SubjectId, version_number: i64) -> Result<()>;

    /// Persist a new record. Its version number must be reserved and its
    /// parent, if any, must already exist.
    async fn create(&self, record: &VersionRecord) -> Result<()>;

    async fn get(&self, id: VersionId) -> Result<Option<VersionRecord>>;

    /// All records of a subject ordered by version number, then creation.
    async fn list_for_subject(&self, subject_id: SubjectId) -> Result<Vec<VersionRecord>>;

    /// Move a `generating` record to its terminal state.
    async fn finish(&self, id: VersionId, outcome: VersionOutcome) -> Result<VersionRecord>;

    /// Change status along an allowed transition.
    async fn set_status(&self, id: VersionId, status: VersionStatus) -> Result<VersionRecord>;

    async fn set_rating(&self, id: VersionId, rating: u8) -> Result<VersionRecord>;

    async fn set_feedback(&self, id: VersionId, feedback: &str) -> Result<VersionRecord>;
}

/// Lifetime usage counters per provider.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn record_usage(&self, provider_id: &str, success: bool, tokens: u64) -> Result<()>;

    async fn counters(&self, provider_id: &str) -> Result<UsageCounters>;
}

pub(crate) fn check_transition(record: &VersionRecord, next: VersionStatus) -> Result<()> {
    if record.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ProposalError::invalid(format!(
            "version {} cannot move from {} to {}",
            record.id, record.status, next
        )))
    }
}

pub(crate) fn check_rating(rating: u8) -> Result<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(ProposalError::invalid(format!(
            "rating must be between 1 and 5, got {}",
            rating
        )))
    }
}

pub(crate) fn outcome_status(outcome: &VersionOutcome) -> VersionStatus {
    match outcome {
        VersionOutcome::Completed { .. } => VersionStatus::Completed,
        VersionOutcome::Failed { .. } => VersionStatus::Failed,
    }
}
