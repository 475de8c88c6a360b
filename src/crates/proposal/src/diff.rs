//! Line-level and field-level diffs between content snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff as LineDiff};
use std::collections::{BTreeMap, BTreeSet};

/// Changed-field ratio at or above which a diff counts as a major change.
pub const DEFAULT_MAJOR_CHANGE_THRESHOLD: f64 = 0.3;

/// Excerpts of changed text fields are cut to this many characters.
pub const EXCERPT_CHARS: usize = 200;

const CONTEXT_RADIUS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDiff {
    /// 1.0 for identical inputs, near 0.0 for disjoint ones.
    pub similarity_ratio: f64,
    pub added_lines: usize,
    pub removed_lines: usize,
    pub total_changes: usize,
    /// Unified diff with three lines of context, one entry per line.
    pub unified_diff: Vec<String>,
}

/// Line-based diff of two texts.
pub fn diff_text(old: &str, new: &str) -> TextDiff {
    if old == new {
        return TextDiff {
            similarity_ratio: 1.0,
            added_lines: 0,
            removed_lines: 0,
            total_changes: 0,
            unified_diff: Vec::new(),
        };
    }

    let diff = LineDiff::from_lines(old, new);
    let mut added_lines = 0;
    let mut removed_lines = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added_lines += 1,
            ChangeTag::Delete => removed_lines += 1,
            ChangeTag::Equal => {}
        }
    }

    let unified_diff = diff
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header("previous", "current")
        .to_string()
        .lines()
        .map(str::to_string)
        .collect();

    TextDiff {
        similarity_ratio: f64::from(diff.ratio()).clamp(0.0, 1.0),
        added_lines,
        removed_lines,
        total_changes: added_lines + removed_lines,
        unified_diff,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldChange {
    /// Both sides are strings.
    Text {
        old_excerpt: String,
        new_excerpt: String,
        similarity_ratio: f64,
        change_count: usize,
    },
    /// At least one side is not a string; raw values only.
    Value { old: Value, new: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_fields: usize,
    pub changed_fields: usize,
    pub added_fields: usize,
    pub removed_fields: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDiff {
    pub fields_added: Vec<String>,
    pub fields_removed: Vec<String>,
    pub fields_changed: BTreeMap<String, FieldChange>,
    pub summary: DiffSummary,
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Field-by-field diff of two mappings. Fields are reported in key order.
pub fn diff_structured(old: &Map<String, Value>, new: &Map<String, Value>) -> StructuredDiff {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut result = StructuredDiff::default();

    for key in &keys {
        match (old.get(*key), new.get(*key)) {
            (None, Some(_)) => result.fields_added.push((*key).clone()),
            (Some(_), None) => result.fields_removed.push((*key).clone()),
            (Some(a), Some(b)) if a != b => {
                let change = match (a, b) {
                    (Value::String(a), Value::String(b)) => {
                        let text = diff_text(a, b);
                        FieldChange::Text {
                            old_excerpt: excerpt(a),
                            new_excerpt: excerpt(b),
                            similarity_ratio: text.similarity_ratio,
                            change_count: text.total_changes,
                        }
                    }
                    _ => FieldChange::Value {
                        old: a.clone(),
                        new: b.clone(),
                    },
                };
                result.fields_changed.insert((*key).clone(), change);
            }
            _ => {}
        }
    }

    result.summary = DiffSummary {
        total_fields: keys.len(),
        changed_fields: result.fields_changed.len(),
        added_fields: result.fields_added.len(),
        removed_fields: result.fields_removed.len(),
    };
    result
}

/// Whether the share of touched fields reaches `threshold`. Always false
/// for a diff over zero fields.
pub fn is_major_change(result: &StructuredDiff, threshold: f64) -> bool {
    let s = &result.summary;
    if s.total_fields == 0 {
        return false;
    }
    let touched = (s.changed_fields + s.added_fields + s.removed_fields) as f64;
    touched / s.total_fields as f64 >= threshold
}

fn count_fields(verb: &str, n: usize) -> String {
    if n == 1 {
        format!("{} 1 field", verb)
    } else {
        format!("{} {} fields", verb, n)
    }
}

/// One-line description of a structured diff.
pub fn human_summary(result: &StructuredDiff) -> String {
    let s = &result.summary;
    let parts: Vec<String> = [
        ("modified", s.changed_fields),
        ("added", s.added_fields),
        ("removed", s.removed_fields),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(verb, n)| count_fields(verb, n))
    .collect();

    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}
