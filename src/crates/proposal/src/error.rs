//! Error types for proposal generation and version management.

use crate::model::Section;
use llm::LlmError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProposalError>;

#[derive(Debug, Error)]
pub enum ProposalError {
    /// Provider could not be resolved or called outside a section.
    #[error(transparent)]
    Provider(#[from] LlmError),

    /// A section call failed; the whole generation fails with it.
    #[error("section {section} failed: {source}")]
    Section {
        section: Section,
        #[source]
        source: LlmError,
    },

    /// Another writer took this version number first.
    #[error("version {version_number} of subject {subject_id} is already allocated")]
    VersionConflict { subject_id: i64, version_number: i64 },

    /// The record's status changed between read and write.
    #[error("version {version_id} was modified concurrently")]
    ConcurrentUpdate { version_id: uuid::Uuid },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProposalError {
    pub fn not_found(context: impl Into<String>) -> Self {
        ProposalError::NotFound(context.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ProposalError::InvalidRequest(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        ProposalError::Storage(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProposalError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ProposalError::VersionConflict { .. } | ProposalError::ConcurrentUpdate { .. }
        )
    }

    /// Short diagnostic stored on failed version records. Provider messages
    /// keep their vendor attribution.
    pub fn summary(&self) -> String {
        match self {
            ProposalError::Provider(e) => e.summary(),
            ProposalError::Section { section, source } => {
                format!("{}: {}", section, source.summary())
            }
            other => {
                let text = other.to_string();
                if text.chars().count() > 300 {
                    format!("{}...", text.chars().take(300).collect::<String>())
                } else {
                    text
                }
            }
        }
    }
}

impl From<sqlx::Error> for ProposalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ProposalError::NotFound("row not found".into()),
            other => ProposalError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ProposalError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ProposalError::Storage(format!("migration failed: {}", err))
    }
}
