use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analysis::AnalysisResult;
use super::enums::{DismissalReason, NoteKind, NoteStatus};

// ═══════════════════════════════════════════
// Notes: ingested sources
// ═══════════════════════════════════════════

/// One ingested source describing the encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub kind: NoteKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_media: Option<MediaBlob>,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub status: NoteStatus,
    /// Transcription confidence, 0..=100. Fractional values are kept.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "confidence_pct::deserialize"
    )]
    pub confidence: Option<f32>,
}

impl Note {
    /// A typed note, ready on creation.
    pub fn text(id: impl Into<String>, label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NoteKind::Text,
            content: content.into(),
            original_media: None,
            label: label.into(),
            created_at: Utc::now(),
            status: NoteStatus::Ready,
            confidence: None,
        }
    }

    /// Set the transcription confidence, clamped to 0..=100.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence_pct::clamp(confidence);
        self
    }
}

mod confidence_pct {
    use serde::{Deserialize, Deserializer};

    /// Out-of-range values are clamped; NaN is treated as absent.
    pub fn clamp(value: f32) -> Option<f32> {
        if value.is_nan() {
            None
        } else {
            Some(value.clamp(0.0, 100.0))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f32>, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?.and_then(clamp))
    }
}

/// Uploaded image/audio kept alongside its transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════
// Patient details
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientDetails {
    pub name: String,
    pub date_of_birth: String,
    pub sex: String,
    pub medical_record_number: String,
    pub encounter_date: String,
    pub chief_complaint: String,
}

impl PatientDetails {
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.trim().is_empty())
    }

    pub fn fields(&self) -> [&String; 6] {
        [
            &self.name,
            &self.date_of_birth,
            &self.sex,
            &self.medical_record_number,
            &self.encounter_date,
            &self.chief_complaint,
        ]
    }

    /// Apply `f` to every free-text field.
    pub fn map_fields(&self, mut f: impl FnMut(&str) -> String) -> Self {
        Self {
            name: f(&self.name),
            date_of_birth: f(&self.date_of_birth),
            sex: f(&self.sex),
            medical_record_number: f(&self.medical_record_number),
            encounter_date: f(&self.encounter_date),
            chief_complaint: f(&self.chief_complaint),
        }
    }
}

// ═══════════════════════════════════════════
// Dispositions and audit events
// ═══════════════════════════════════════════

/// Disposition of one conflict. Keyed 1:1 by `conflict_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissalRecord {
    pub conflict_id: String,
    pub reason: DismissalReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_source_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DismissalRecord {
    pub fn new(conflict_id: impl Into<String>, reason: DismissalReason) -> Self {
        Self {
            conflict_id: conflict_id.into(),
            reason,
            note: None,
            resolution_source_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_resolution(&self) -> bool {
        self.reason == DismissalReason::Resolved
    }
}

/// One case-level audit event. `action` is a tag such as `CASE_CREATED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseHistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ═══════════════════════════════════════════
// Case: persisted snapshot
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub patient_details: PatientDetails,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub dismissed_flags: BTreeMap<String, DismissalRecord>,
    /// Last-saved time, overwritten on every save.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<CaseHistoryEvent>,
}

/// Listing row for the saved-cases view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummary {
    pub id: String,
    pub name: String,
    pub patient_name: String,
    pub note_count: usize,
    pub conflict_count: usize,
    pub active_conflict_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl Case {
    pub fn summary(&self) -> CaseSummary {
        let conflicts = self
            .result
            .as_ref()
            .map(|r| r.critical_conflicts.as_slice())
            .unwrap_or_default();
        CaseSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            patient_name: self.patient_details.name.clone(),
            note_count: self.notes.len(),
            conflict_count: conflicts.len(),
            active_conflict_count: conflicts
                .iter()
                .filter(|c| !self.dismissed_flags.contains_key(&c.id))
                .count(),
            timestamp: self.timestamp,
        }
    }
}
