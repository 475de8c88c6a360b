//! Generation context: subject metadata, requirements and reference excerpts
//! bounded to a fixed size before they are placed in section prompts.

use crate::error::Result;
use crate::model::{ContentSnapshot, ReferenceExcerpt, SubjectId, SubjectProfile};
use async_trait::async_trait;
use result_cache::ResultCache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_MAX_REFERENCES: usize = 3;
pub const DEFAULT_MAX_EXCERPT_CHARS: usize = 500;

/// Supplies subject metadata and reference excerpts for a subject.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn subject(&self, subject_id: SubjectId) -> Result<Option<SubjectProfile>>;

    /// Up to `limit` excerpts relevant to `requirements`, best first.
    async fn references(
        &self,
        subject_id: SubjectId,
        requirements: &str,
        limit: usize,
    ) -> Result<Vec<ReferenceExcerpt>>;
}

/// Source with nothing to offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

#[async_trait]
impl ReferenceSource for NoReferences {
    async fn subject(&self, _subject_id: SubjectId) -> Result<Option<SubjectProfile>> {
        Ok(None)
    }

    async fn references(
        &self,
        _subject_id: SubjectId,
        _requirements: &str,
        _limit: usize,
    ) -> Result<Vec<ReferenceExcerpt>> {
        Ok(Vec::new())
    }
}

/// Fixed, in-memory subjects and references.
#[derive(Debug, Default, Clone)]
pub struct StaticReferences {
    subjects: HashMap<SubjectId, SubjectProfile>,
    references: HashMap<SubjectId, Vec<ReferenceExcerpt>>,
}

impl StaticReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, profile: SubjectProfile) -> Self {
        self.subjects.insert(profile.subject_id, profile);
        self
    }

    pub fn with_reference(
        mut self,
        subject_id: SubjectId,
        title: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        self.references
            .entry(subject_id)
            .or_default()
            .push(ReferenceExcerpt {
                title: title.into(),
                excerpt: excerpt.into(),
            });
        self
    }
}

#[async_trait]
impl ReferenceSource for StaticReferences {
    async fn subject(&self, subject_id: SubjectId) -> Result<Option<SubjectProfile>> {
        Ok(self.subjects.get(&subject_id).cloned())
    }

    async fn references(
        &self,
        subject_id: SubjectId,
        _requirements: &str,
        limit: usize,
    ) -> Result<Vec<ReferenceExcerpt>> {
        Ok(self
            .references
            .get(&subject_id)
            .map(|refs| refs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// What one generation is asked to produce.
#[derive(Debug, Clone, Default)]
pub struct GenerationInput {
    pub subject_id: SubjectId,
    pub requirements: String,
    /// Content of the version being iterated on.
    pub previous: Option<ContentSnapshot>,
    pub feedback: Option<String>,
}

impl GenerationInput {
    pub fn new(subject_id: SubjectId, requirements: impl Into<String>) -> Self {
        Self {
            subject_id,
            requirements: requirements.into(),
            previous: None,
            feedback: None,
        }
    }
}

/// Bounded context shared by every section prompt of one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationContext {
    pub subject_id: SubjectId,
    pub subject: Option<SubjectProfile>,
    pub requirements: String,
    pub references: Vec<ReferenceExcerpt>,
    pub previous: Option<String>,
    pub feedback: Option<String>,
}

impl GenerationContext {
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(subject) = &self.subject {
            let _ = writeln!(out, "Project: {}", subject.title);
            for (label, value) in [
                ("Customer", Some(subject.customer.as_str())),
                ("Industry", Some(subject.industry.as_str())),
                ("Budget", subject.budget.as_deref()),
                ("Deadline", subject.deadline.as_deref()),
            ] {
                if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                    let _ = writeln!(out, "{}: {}", label, value);
                }
            }
            out.push('\n');
        }

        let _ = writeln!(out, "Requirements:\n{}", self.requirements.trim());

        if !self.references.is_empty() {
            out.push_str("\nReference material:\n");
            for (i, reference) in self.references.iter().enumerate() {
                let _ = writeln!(out, "[{}] {}\n{}", i + 1, reference.title, reference.excerpt);
            }
        }

        if let Some(previous) = &self.previous {
            let _ = writeln!(out, "\nPrevious version:\n{}", previous);
        }
        if let Some(feedback) = &self.feedback {
            let _ = writeln!(out, "\nReviewer feedback to address:\n{}", feedback);
        }

        out.trim_end().to_string()
    }
}

const TRUNCATION_MARKER: &str = "...";

/// Cut `text` to at most `max_chars` characters, the trailing `...` marker
/// included. Limits too small to hold the marker cut without it.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker {
        return text.chars().take(max_chars).collect();
    }
    let kept: String = text.chars().take(max_chars - marker).collect();
    format!("{}{}", kept, TRUNCATION_MARKER)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedLookup {
    subject: Option<SubjectProfile>,
    references: Vec<ReferenceExcerpt>,
}

/// Builds [`GenerationContext`]s, caching successful lookups.
///
/// Lookups are keyed under `references:{subject_id}:*`, outside the
/// `subject:{id}:*` prefix that version changes invalidate, and expire with
/// the cache's default TTL.
pub struct ContextBuilder {
    source: Arc<dyn ReferenceSource>,
    cache: Option<Arc<ResultCache>>,
    max_references: usize,
    max_excerpt_chars: usize,
}

impl ContextBuilder {
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            source,
            cache: None,
            max_references: DEFAULT_MAX_REFERENCES,
            max_excerpt_chars: DEFAULT_MAX_EXCERPT_CHARS,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_limits(mut self, max_references: usize, max_excerpt_chars: usize) -> Self {
        self.max_references = max_references;
        self.max_excerpt_chars = max_excerpt_chars;
        self
    }

    /// Assemble the context for `input`. Lookup failures degrade to an
    /// empty subject and no references.
    pub async fn build(&self, input: &GenerationInput) -> GenerationContext {
        let lookup = self.lookup(input).await;
        GenerationContext {
            subject_id: input.subject_id,
            subject: lookup.subject,
            requirements: input.requirements.clone(),
            references: lookup.references,
            previous: input
                .previous
                .as_ref()
                .map(|c| c.full_text.trim().to_string())
                .filter(|t| !t.is_empty()),
            feedback: input
                .feedback
                .as_ref()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        }
    }

    fn cache_key(&self, input: &GenerationInput, cache: &ResultCache) -> String {
        let suffix = cache.key(
            "references",
            &json!({
                "requirements": input.requirements,
                "max_references": self.max_references,
                "max_excerpt_chars": self.max_excerpt_chars,
            }),
        );
        format!("references:{}:{}", input.subject_id, suffix)
    }

    async fn lookup(&self, input: &GenerationInput) -> CachedLookup {
        let mut degraded = false;
        let key = self.cache.as_ref().map(|c| (c, self.cache_key(input, c)));
        if let Some((cache, key)) = &key {
            if let Some(hit) = cache.get_json::<CachedLookup>(key).await {
                debug!(subject_id = input.subject_id, "reference lookup served from cache");
                return hit;
            }
        }

        let subject = match self.source.subject(input.subject_id).await {
            Ok(subject) => subject,
            Err(e) => {
                warn!(subject_id = input.subject_id, error = %e, "subject lookup failed");
                degraded = true;
                None
            }
        };
        let references = match self
            .source
            .references(input.subject_id, &input.requirements, self.max_references)
            .await
        {
            Ok(refs) => refs
                .into_iter()
                .take(self.max_references)
                .map(|r| ReferenceExcerpt {
                    title: r.title,
                    excerpt: truncate_chars(r.excerpt.trim(), self.max_excerpt_chars),
                })
                .collect(),
            Err(e) => {
                warn!(subject_id = input.subject_id, error = %e, "reference lookup failed");
                degraded = true;
                Vec::new()
            }
        };

        let lookup = CachedLookup {
            subject,
            references,
        };
        match &key {
            Some((cache, key)) if !degraded => cache.set_json(key, &lookup, None).await,
            _ => {}
        }
        lookup
    }
}
