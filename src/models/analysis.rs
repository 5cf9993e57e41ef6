//! Analysis result produced by the external AI collaborator.
//!
//! Treated as an already-validated value. The only normalization applied
//! here is fallback ids for list items that arrive without one, and
//! severity counts are always recomputed from the conflict list.

use serde::{Deserialize, Serialize};

use super::enums::{Confidence, Severity};

/// One contradiction among sources, flagged by the analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(default)]
    pub id: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub why_it_matters: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub excerpts: Vec<Excerpt>,
}

impl Conflict {
    pub fn references_source(&self, source_id: &str) -> bool {
        self.source_ids.iter().any(|id| id == source_id)
    }
}

/// Quoted passage of a source supporting a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Excerpt {
    pub source_id: String,
    pub text: String,
}

/// Information the analysis believes is absent from every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingInformation {
    #[serde(default)]
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub date: String,
    pub description: String,
    #[serde(default)]
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub patient_trajectory_summary: String,
    #[serde(default)]
    pub critical_conflicts: Vec<Conflict>,
    #[serde(default)]
    pub potentially_missing_information: Vec<MissingInformation>,
    #[serde(default)]
    pub timeline_events: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_confidence: Option<Confidence>,
}

/// Conflict counts by severity, always derived from the conflict list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
}

impl SeverityCounts {
    pub fn from_conflicts<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Self {
        conflicts
            .into_iter()
            .fold(Self::default(), |mut counts, conflict| {
                match conflict.severity {
                    Severity::High => counts.high += 1,
                    Severity::Medium => counts.medium += 1,
                    Severity::Low => counts.low += 1,
                }
                counts.total += 1;
                counts
            })
    }
}

impl AnalysisResult {
    /// Assign `conflict-<index>` / `missing-<index>` to items with no id.
    pub fn normalized(mut self) -> Self {
        for (index, conflict) in self.critical_conflicts.iter_mut().enumerate() {
            if conflict.id.trim().is_empty() {
                conflict.id = format!("conflict-{index}");
            }
        }
        for (index, item) in self.potentially_missing_information.iter_mut().enumerate() {
            if item.id.trim().is_empty() {
                item.id = format!("missing-{index}");
            }
        }
        self
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        SeverityCounts::from_conflicts(&self.critical_conflicts)
    }

    pub fn conflict(&self, conflict_id: &str) -> Option<&Conflict> {
        self.critical_conflicts.iter().find(|c| c.id == conflict_id)
    }

    pub fn conflict_ids(&self) -> impl Iterator<Item = &str> {
        self.critical_conflicts.iter().map(|c| c.id.as_str())
    }
}
