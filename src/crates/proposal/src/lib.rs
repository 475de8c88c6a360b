//! Multi-provider sales-proposal generation
//!
//! This crate turns a subject's requirements into proposal text by calling one
//! or more LLM providers concurrently, keeps every candidate as a numbered
//! version record, and diffs versions on demand.
//!
//! - [`generator::Generator`] produces one proposal with one provider, one
//!   call per section.
//! - [`fanout::ProposalService`] fans a request out to several providers and
//!   manages version records (iterate, compare, select, rate, lineage).
//! - [`diff`] computes line- and field-level diffs between snapshots.
//! - [`store`] holds the persistence interfaces and their in-memory and
//!   SQLite implementations.

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod store;

pub use config::AppConfig;
pub use context::{ContextBuilder, GenerationInput, NoReferences, ReferenceSource, StaticReferences};
pub use diff::{
    diff_structured, diff_text, human_summary, is_major_change, FieldChange, StructuredDiff,
    TextDiff, DEFAULT_MAJOR_CHANGE_THRESHOLD,
};
pub use error::{ProposalError, Result};
pub use fanout::{FanoutSettings, ProposalService};
pub use generator::{GeneratedProposal, GenerationSettings, Generator};
pub use metrics::{CallStatus, InMemoryMetrics, MetricsSink, TracingMetrics};
pub use model::{
    ComparisonSummary, ContentSnapshot, GenerationRequest, Section, SubjectProfile, VersionId,
    VersionRecord, VersionStatus,
};
pub use store::{MemoryStore, ProviderStore, SqliteStore, VersionStore};
