//! Domain types: content snapshots, version records and comparison summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type SubjectId = i64;
pub type VersionId = Uuid;

/// Generated proposal sections, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    ExecutiveSummary,
    SolutionOverview,
    TechnicalDetail,
    ImplementationPlan,
}

impl Section {
    /// Fixed generation order.
    pub const ORDER: [Section; 4] = [
        Section::ExecutiveSummary,
        Section::SolutionOverview,
        Section::TechnicalDetail,
        Section::ImplementationPlan,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Section::ExecutiveSummary => "executive_summary",
            Section::SolutionOverview => "solution_overview",
            Section::TechnicalDetail => "technical_detail",
            Section::ImplementationPlan => "implementation_plan",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::ExecutiveSummary => "Executive Summary",
            Section::SolutionOverview => "Solution Overview",
            Section::TechnicalDetail => "Technical Detail",
            Section::ImplementationPlan => "Implementation Plan",
        }
    }

    /// Instruction placed before the shared context in the section prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Section::ExecutiveSummary => {
                "Write the executive summary of a sales proposal. In two or three short \
                 paragraphs, state the customer's problem, the proposed solution and the \
                 main business outcome."
            }
            Section::SolutionOverview => {
                "Write the solution overview of a sales proposal. Describe the proposed \
                 solution, its main components and how each one addresses the requirements."
            }
            Section::TechnicalDetail => {
                "Write the technical detail section of a sales proposal. Cover architecture, \
                 integration points, security and operational concerns that follow from the \
                 requirements."
            }
            Section::ImplementationPlan => {
                "Write the implementation plan of a sales proposal. Lay out phases, \
                 milestones, deliverables and the responsibilities of each party."
            }
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Named sections of one generated proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub solution_overview: String,
    #[serde(default)]
    pub technical_detail: String,
    #[serde(default)]
    pub implementation_plan: String,
    #[serde(default)]
    pub full_text: String,
}

impl ContentSnapshot {
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::ExecutiveSummary => &self.executive_summary,
            Section::SolutionOverview => &self.solution_overview,
            Section::TechnicalDetail => &self.technical_detail,
            Section::ImplementationPlan => &self.implementation_plan,
        }
    }

    pub fn set_section(&mut self, section: Section, text: String) {
        match section {
            Section::ExecutiveSummary => self.executive_summary = text,
            Section::SolutionOverview => self.solution_overview = text,
            Section::TechnicalDetail => self.technical_detail = text,
            Section::ImplementationPlan => self.implementation_plan = text,
        }
    }

    /// Rebuild `full_text` from the non-empty sections, in order, separated
    /// by a blank line.
    pub fn assemble_full_text(&mut self) {
        self.full_text = Section::ORDER
            .iter()
            .map(|s| self.section(*s).trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    pub fn is_empty(&self) -> bool {
        self.full_text.trim().is_empty()
            && Section::ORDER.iter().all(|s| self.section(*s).trim().is_empty())
    }

    /// Field-keyed view used by the structured diff.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        for section in Section::ORDER {
            fields.insert(
                section.key().to_string(),
                Value::String(self.section(section).to_string()),
            );
        }
        fields.insert("full_text".to_string(), Value::String(self.full_text.clone()));
        fields
    }

    /// Character count per section, without the text itself.
    pub fn section_lengths(&self) -> BTreeMap<String, usize> {
        Section::ORDER
            .iter()
            .map(|s| (s.key().to_string(), self.section(*s).chars().count()))
            .collect()
    }
}

/// Lifecycle of a version record.
///
/// `draft -> generating -> {completed | failed}`; a completed record may be
/// `selected`, and a selected one returns to `completed` when another version
/// of the subject is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Generating,
    Completed,
    Failed,
    Selected,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Generating => "generating",
            VersionStatus::Completed => "completed",
            VersionStatus::Failed => "failed",
            VersionStatus::Selected => "selected",
        }
    }

    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Draft, Generating)
                | (Generating, Completed)
                | (Generating, Failed)
                | (Completed, Selected)
                | (Selected, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VersionStatus::Completed | VersionStatus::Failed | VersionStatus::Selected
        )
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(VersionStatus::Draft),
            "generating" => Ok(VersionStatus::Generating),
            "completed" => Ok(VersionStatus::Completed),
            "failed" => Ok(VersionStatus::Failed),
            "selected" => Ok(VersionStatus::Selected),
            other => Err(format!("unknown version status '{}'", other)),
        }
    }
}

/// Fields needed to open a new version record.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub subject_id: SubjectId,
    pub version_number: i64,
    pub requirements: String,
    pub provider_id: String,
    pub model_id: String,
    pub parent_version_id: Option<VersionId>,
}

/// Terminal result of one generation task.
#[derive(Debug, Clone)]
pub enum VersionOutcome {
    Completed {
        content: ContentSnapshot,
        generation_secs: f64,
        tokens_used: u64,
    },
    Failed {
        error_message: String,
        generation_secs: f64,
    },
}

/// One provider's candidate for one version number of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    pub subject_id: SubjectId,
    pub version_number: i64,
    /// Requirements text the version was generated from.
    #[serde(default)]
    pub requirements: String,
    pub content: ContentSnapshot,
    pub provider_id: String,
    pub model_id: String,
    pub status: VersionStatus,
    pub parent_version_id: Option<VersionId>,
    pub generation_secs: f64,
    pub tokens_used: u64,
    pub quality_score: Option<f64>,
    pub user_rating: Option<u8>,
    pub feedback: Option<String>,
    /// Short, vendor-attributed diagnostic of a failed generation.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionRecord {
    /// A record in `generating` state with empty content.
    pub fn generating(new: NewVersion) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject_id: new.subject_id,
            version_number: new.version_number,
            requirements: new.requirements,
            content: ContentSnapshot::default(),
            provider_id: new.provider_id,
            model_id: new.model_id,
            status: VersionStatus::Generating,
            parent_version_id: new.parent_version_id,
            generation_secs: 0.0,
            tokens_used: 0,
            quality_score: None,
            user_rating: None,
            feedback: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a terminal outcome in place.
    pub fn apply(&mut self, outcome: VersionOutcome) {
        match outcome {
            VersionOutcome::Completed {
                content,
                generation_secs,
                tokens_used,
            } => {
                self.status = VersionStatus::Completed;
                self.content = content;
                self.generation_secs = generation_secs;
                self.tokens_used = tokens_used;
                self.error_message = None;
            }
            VersionOutcome::Failed {
                error_message,
                generation_secs,
            } => {
                self.status = VersionStatus::Failed;
                self.generation_secs = generation_secs;
                self.error_message = Some(error_message);
            }
        }
        self.updated_at = Utc::now();
    }
}

/// Input of one fan-out call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub subject_id: SubjectId,
    pub requirements: String,
    pub provider_ids: Vec<String>,
    #[serde(default)]
    pub parent_version_id: Option<VersionId>,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Subject metadata used to build the generation context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: SubjectId,
    pub title: String,
    #[serde(default)]
    pub customer: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// A reference document excerpt offered as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceExcerpt {
    pub title: String,
    pub excerpt: String,
}

/// Redacted view of one version: no generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: VersionId,
    pub version_number: i64,
    pub provider_id: String,
    pub model_id: String,
    pub status: VersionStatus,
    pub tokens_used: u64,
    pub generation_secs: f64,
    pub user_rating: Option<u8>,
    pub section_lengths: BTreeMap<String, usize>,
    pub error_message: Option<String>,
}

impl From<&VersionRecord> for VersionSummary {
    fn from(record: &VersionRecord) -> Self {
        Self {
            id: record.id,
            version_number: record.version_number,
            provider_id: record.provider_id.clone(),
            model_id: record.model_id.clone(),
            status: record.status,
            tokens_used: record.tokens_used,
            generation_secs: record.generation_secs,
            user_rating: record.user_rating,
            section_lengths: record.content.section_lengths(),
            error_message: record.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonAggregate {
    /// `provider_id/model_id` of every compared version, in request order.
    pub providers: Vec<String>,
    pub status_histogram: BTreeMap<String, usize>,
    pub mean_tokens: f64,
    pub mean_generation_secs: f64,
    pub min_version_number: i64,
    pub max_version_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub versions: Vec<VersionSummary>,
    pub aggregate: ComparisonAggregate,
}

impl ComparisonSummary {
    /// Summarize `records`; returns `None` for an empty slice.
    pub fn from_records(records: &[VersionRecord]) -> Option<Self> {
        let first = records.first()?;
        let count = records.len() as f64;

        let mut status_histogram = BTreeMap::new();
        for record in records {
            *status_histogram
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let aggregate = ComparisonAggregate {
            providers: records
                .iter()
                .map(|r| format!("{}/{}", r.provider_id, r.model_id))
                .collect(),
            status_histogram,
            mean_tokens: records.iter().map(|r| r.tokens_used as f64).sum::<f64>() / count,
            mean_generation_secs: records.iter().map(|r| r.generation_secs).sum::<f64>() / count,
            min_version_number: records
                .iter()
                .map(|r| r.version_number)
                .min()
                .unwrap_or(first.version_number),
            max_version_number: records
                .iter()
                .map(|r| r.version_number)
                .max()
                .unwrap_or(first.version_number),
        };

        Some(Self {
            versions: records.iter().map(VersionSummary::from).collect(),
            aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, number: i64) -> VersionRecord {
        VersionRecord::generating(NewVersion {
            subject_id: 1,
            version_number: number,
            requirements: "r".into(),
            provider_id: provider.into(),
            model_id: "m".into(),
            parent_version_id: None,
        })
    }

    #[test]
    fn test_full_text_skips_empty_sections() {
        let mut content = ContentSnapshot::default();
        content.set_section(Section::ExecutiveSummary, "Summary.".into());
        content.set_section(Section::SolutionOverview, "   ".into());
        content.set_section(Section::ImplementationPlan, "Plan.\n".into());
        content.assemble_full_text();
        assert_eq!(content.full_text, "Summary.\n\nPlan.");
    }

    #[test]
    fn test_status_transitions() {
        use VersionStatus::*;
        assert!(Draft.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
        assert!(Generating.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Selected));
        assert!(!Failed.can_transition_to(Selected));
        assert!(!Completed.can_transition_to(Generating));
        assert!(!Generating.is_terminal());
        assert_eq!("selected".parse::<VersionStatus>().unwrap(), Selected);
        assert!("bogus".parse::<VersionStatus>().is_err());
    }

    #[test]
    fn test_apply_outcome() {
        let mut r = record("p1", 1);
        assert_eq!(r.status, VersionStatus::Generating);
        assert!(r.content.is_empty());

        r.apply(VersionOutcome::Failed {
            error_message: "openai: request timed out".into(),
            generation_secs: 1.5,
        });
        assert_eq!(r.status, VersionStatus::Failed);
        assert_eq!(r.error_message.as_deref(), Some("openai: request timed out"));
    }

    #[test]
    fn test_comparison_summary_aggregates() {
        let mut a = record("p1", 1);
        a.apply(VersionOutcome::Completed {
            content: ContentSnapshot {
                executive_summary: "abc".into(),
                ..Default::default()
            },
            generation_secs: 2.0,
            tokens_used: 100,
        });
        let mut b = record("p2", 2);
        b.apply(VersionOutcome::Failed {
            error_message: "x".into(),
            generation_secs: 1.0,
        });

        let summary = ComparisonSummary::from_records(&[a, b]).unwrap();
        assert_eq!(summary.aggregate.providers, vec!["p1/m", "p2/m"]);
        assert_eq!(summary.aggregate.status_histogram["completed"], 1);
        assert_eq!(summary.aggregate.status_histogram["failed"], 1);
        assert_eq!(summary.aggregate.mean_tokens, 50.0);
        assert_eq!(summary.aggregate.mean_generation_secs, 1.5);
        assert_eq!(summary.aggregate.min_version_number, 1);
        assert_eq!(summary.aggregate.max_version_number, 2);
        assert_eq!(summary.versions[0].section_lengths["executive_summary"], 3);

        assert!(ComparisonSummary::from_records(&[]).is_none());
    }
}
