//! Read-only view handed to report builders (PDF/JSON).
//!
//! Dispositions are merged into the conflict list here so report code never
//! needs the ledger, the audit trail, or edit history.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::{ConflictLedger, Disposition};
use crate::models::{
    AnalysisResult, Conflict, DismissalRecord, Note, NoteKind, NoteStatus, PatientDetails,
    SeverityCounts,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportView {
    pub patient_details: PatientDetails,
    pub notes: Vec<ExportedNote>,
    pub result: Option<AnalysisResult>,
    pub conflicts: Vec<ExportedConflict>,
    pub counts: SeverityCounts,
    pub active_counts: SeverityCounts,
    pub generated_at: DateTime<Utc>,
}

/// Note without its media bytes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedNote {
    pub id: String,
    pub kind: NoteKind,
    pub label: String,
    pub content: String,
    pub status: NoteStatus,
    pub confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedConflict {
    #[serde(flatten)]
    pub conflict: Conflict,
    pub disposition: Disposition,
    pub dismissal: Option<DismissalRecord>,
}

impl ExportView {
    pub fn build(
        patient_details: &PatientDetails,
        notes: &[Note],
        result: Option<&AnalysisResult>,
        ledger: &ConflictLedger,
    ) -> Self {
        let conflicts: Vec<ExportedConflict> = result
            .map(|r| r.critical_conflicts.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|conflict| ExportedConflict {
                conflict: conflict.clone(),
                disposition: ledger.disposition(&conflict.id),
                dismissal: ledger.get(&conflict.id).cloned(),
            })
            .collect();

        let counts = SeverityCounts::from_conflicts(conflicts.iter().map(|c| &c.conflict));
        let active_counts = SeverityCounts::from_conflicts(
            conflicts
                .iter()
                .filter(|c| c.disposition == Disposition::Active)
                .map(|c| &c.conflict),
        );

        Self {
            patient_details: patient_details.clone(),
            notes: notes.iter().map(ExportedNote::from).collect(),
            result: result.cloned(),
            conflicts,
            counts,
            active_counts,
            generated_at: Utc::now(),
        }
    }

    pub fn active_conflicts(&self) -> impl Iterator<Item = &ExportedConflict> {
        self.conflicts
            .iter()
            .filter(|c| c.disposition == Disposition::Active)
    }
}

impl From<&Note> for ExportedNote {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            kind: note.kind,
            label: note.label.clone(),
            content: note.content.clone(),
            status: note.status,
            confidence: note.confidence,
            created_at: note.created_at,
        }
    }
}
