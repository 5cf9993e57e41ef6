//! Durable persistence of complete case snapshots.
//!
//! The whole collection lives under one key as a JSON array, newest case
//! first. Every mutation is a read-modify-write of that collection, and
//! every free-text field passes through the sanitizer before it is written.

pub mod medium;
pub mod sqlite;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config;
use crate::models::{Case, CaseSummary, Note};
use crate::sanitize::sanitize_text;

pub use medium::{FileMedium, MemoryMedium, StorageMedium};
pub use sqlite::SqliteMedium;

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded: {needed} bytes needed, limit {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// CaseStore
// ═══════════════════════════════════════════════════════════

pub struct CaseStore {
    medium: Box<dyn StorageMedium>,
    key: String,
}

impl CaseStore {
    pub fn new(medium: impl StorageMedium + 'static) -> Self {
        Self::with_key(medium, config::CASES_STORAGE_KEY)
    }

    pub fn with_key(medium: impl StorageMedium + 'static, key: impl Into<String>) -> Self {
        Self {
            medium: Box::new(medium),
            key: key.into(),
        }
    }

    /// Store backed by the SQLite file under the app data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        let medium = SqliteMedium::open(&config::cases_db_path())?;
        Ok(Self::new(medium))
    }

    /// Store backed by one JSON file per key under the app data directory.
    pub fn open_file_default() -> Self {
        Self::new(FileMedium::new(config::cases_file_dir()))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load every readable stored case.
    ///
    /// Fails soft: an unreadable collection yields an empty list, and
    /// individual records that no longer decode are skipped, each with a
    /// warning on the log rather than an error.
    pub fn load_all(&self) -> Vec<Case> {
        match self.read_entries() {
            Ok(entries) => decode_readable(&self.key, &entries),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to load saved cases, treating as empty");
                Vec::new()
            }
        }
    }

    /// Strict variant of `load_all`: any unreadable record is an error.
    pub fn try_load_all(&self) -> Result<Vec<Case>, StorageError> {
        self.read_entries()?
            .into_iter()
            .map(|entry| serde_json::from_value(entry).map_err(StorageError::from))
            .collect()
    }

    /// Prepend a sanitized copy of `case` and persist. No dedup by id.
    ///
    /// Stored records that no longer decode are written back untouched. If
    /// the collection itself cannot be read the write is refused.
    pub fn create(&self, case: &Case) -> Result<Vec<Case>, StorageError> {
        let mut entries = self.read_entries()?;
        entries.insert(0, serde_json::to_value(sanitize_case(case))?);
        self.persist(&entries)?;
        tracing::info!(case_id = %case.id, total = entries.len(), "Case created");
        Ok(decode_readable(&self.key, &entries))
    }

    /// Replace the stored case with the same id in place, or create it.
    pub fn update(&self, case: &Case) -> Result<Vec<Case>, StorageError> {
        let mut entries = self.read_entries()?;
        let Some(position) = entries.iter().position(|e| entry_id(e) == Some(case.id.as_str()))
        else {
            tracing::debug!(case_id = %case.id, "Case not stored yet, creating instead");
            return self.create(case);
        };
        entries[position] = serde_json::to_value(sanitize_case(case))?;
        self.persist(&entries)?;
        tracing::info!(case_id = %case.id, "Case updated");
        Ok(decode_readable(&self.key, &entries))
    }

    /// Remove every case with `id`. Unknown ids leave storage untouched.
    pub fn delete(&self, id: &str) -> Result<Vec<Case>, StorageError> {
        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|e| entry_id(e) != Some(id));
        if entries.len() == before {
            tracing::debug!(case_id = id, "Delete of unknown case ignored");
            return Ok(decode_readable(&self.key, &entries));
        }
        self.persist(&entries)?;
        tracing::info!(case_id = id, removed = before - entries.len(), "Case deleted");
        Ok(decode_readable(&self.key, &entries))
    }

    pub fn find(&self, id: &str) -> Option<Case> {
        self.load_all().into_iter().find(|c| c.id == id)
    }

    pub fn summaries(&self) -> Vec<CaseSummary> {
        self.load_all().iter().map(Case::summary).collect()
    }

    /// Raw stored records, one JSON value per case.
    fn read_entries(&self) -> Result<Vec<Value>, StorageError> {
        match self.medium.read(&self.key)? {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }

    fn persist(&self, entries: &[Value]) -> Result<(), StorageError> {
        let json = serde_json::to_string(entries)?;
        self.medium.write(&self.key, &json)
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id")?.as_str()
}

fn decode_readable(key: &str, entries: &[Value]) -> Vec<Case> {
    entries
        .iter()
        .filter_map(|entry| match Case::deserialize(entry) {
            Ok(case) => Some(case),
            Err(e) => {
                tracing::warn!(key, case_id = entry_id(entry).unwrap_or("?"), error = %e, "Skipping unreadable stored case");
                None
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Sanitization & search
// ═══════════════════════════════════════════════════════════

/// Copy of `case` with every free-text field sanitized. Structured data
/// (result, dispositions, history) is copied as-is.
pub fn sanitize_case(case: &Case) -> Case {
    Case {
        id: case.id.clone(),
        name: sanitize_text(&case.name),
        patient_details: case.patient_details.map_fields(sanitize_text),
        notes: case.notes.iter().map(sanitize_note).collect(),
        result: case.result.clone(),
        dismissed_flags: case.dismissed_flags.clone(),
        timestamp: case.timestamp,
        history: case.history.clone(),
    }
}

fn sanitize_note(note: &Note) -> Note {
    Note {
        content: sanitize_text(&note.content),
        label: sanitize_text(&note.label),
        ..note.clone()
    }
}

/// Case-insensitive match on case name, patient name and MRN.
/// An empty query matches everything.
pub fn search_cases<'a>(cases: &'a [Case], query: &str) -> Vec<&'a Case> {
    let needle = query.trim().to_lowercase();
    cases
        .iter()
        .filter(|case| {
            needle.is_empty()
                || [
                    &case.name,
                    &case.patient_details.name,
                    &case.patient_details.medical_record_number,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::models::{
        AnalysisResult, CaseHistoryEvent, Confidence, Conflict, DismissalReason,
        DismissalRecord, PatientDetails, Severity,
    };

    /// Lets a test keep a handle on the medium the store owns.
    struct Shared(Arc<MemoryMedium>);

    impl StorageMedium for Shared {
        fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.read(key)
        }
        fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.0.write(key, value)
        }
    }

    fn shared_store(medium: MemoryMedium) -> (CaseStore, Arc<MemoryMedium>) {
        let medium = Arc::new(medium);
        (CaseStore::new(Shared(Arc::clone(&medium))), medium)
    }

    fn make_case(id: &str, patient: &str) -> Case {
        Case {
            id: id.into(),
            name: format!("{patient} encounter"),
            patient_details: PatientDetails {
                name: patient.into(),
                medical_record_number: format!("MRN-{id}"),
                ..Default::default()
            },
            notes: vec![Note::text("n1", "Triage", "BP 140/90")],
            result: None,
            dismissed_flags: BTreeMap::new(),
            timestamp: Utc::now(),
            history: Vec::new(),
        }
    }

    #[test]
    fn create_prepends_sanitized_case() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();

        let mut case = make_case("b", "Bo");
        case.notes[0].content = "<b>bold</b> & co".into();
        let cases = store.create(&case).unwrap();

        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0], sanitize_case(&case));
        assert_eq!(cases[1].id, "a");
        assert_eq!(store.load_all(), cases);
    }

    #[test]
    fn create_never_deduplicates() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();
        let cases = store.create(&make_case("a", "Ada")).unwrap();
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn update_replaces_in_place_and_is_idempotent() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();
        store.create(&make_case("b", "Bo")).unwrap();
        store.create(&make_case("c", "Cy")).unwrap();

        let mut edited = make_case("b", "Bo");
        edited.name = "Renamed".into();
        let once = store.update(&edited).unwrap();
        let twice = store.update(&edited).unwrap();

        assert_eq!(once, twice);
        let ids: Vec<&str> = twice.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(twice[1].name, "Renamed");
    }

    #[test]
    fn update_unknown_falls_back_to_create() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();
        let cases = store.update(&make_case("z", "Zed")).unwrap();
        assert_eq!(cases[0].id, "z");
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn delete_removes_all_entries_with_id() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();
        store.create(&make_case("b", "Bo")).unwrap();
        store.create(&make_case("a", "Ada")).unwrap();

        let cases = store.delete("a").unwrap();
        assert_eq!(cases.len(), 1);
        assert!(store.load_all().iter().all(|c| c.id != "a"));
    }

    #[test]
    fn delete_unknown_is_noop() {
        let store = CaseStore::new(MemoryMedium::new());
        store.create(&make_case("a", "Ada")).unwrap();
        let before = store.load_all();
        assert_eq!(store.delete("missing").unwrap(), before);
    }

    #[test]
    fn corrupt_data_loads_as_empty() {
        let (store, medium) = shared_store(MemoryMedium::new());
        medium.seed(config::CASES_STORAGE_KEY, "{not json").unwrap();

        assert!(store.load_all().is_empty());
        assert!(matches!(
            store.try_load_all(),
            Err(StorageError::Serialization(_))
        ));
    }

    fn stored_entries(medium: &MemoryMedium) -> Vec<serde_json::Value> {
        let raw = medium.read(config::CASES_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn unreadable_record_survives_mutations() {
        let (store, medium) = shared_store(MemoryMedium::new());
        let readable = serde_json::to_value(make_case("a", "Ada")).unwrap();
        let unreadable = serde_json::json!({
            "id": "legacy",
            "name": "Imported",
            "notes": [{"id": "n1", "kind": "fax", "content": "?"}]
        });
        medium
            .seed(
                config::CASES_STORAGE_KEY,
                &serde_json::to_string(&vec![readable, unreadable.clone()]).unwrap(),
            )
            .unwrap();

        let cases = store.create(&make_case("b", "Bo")).unwrap();
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        store.update(&make_case("a", "Ada")).unwrap();
        store.delete("b").unwrap();

        let entries = stored_entries(&medium);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], unreadable);
        assert_eq!(store.load_all().len(), 1);
        assert!(store.try_load_all().is_err());

        store.delete("legacy").unwrap();
        assert_eq!(stored_entries(&medium).len(), 1);
        assert_eq!(store.try_load_all().unwrap()[0].id, "a");
    }

    #[test]
    fn unreadable_collection_refuses_writes() {
        let (store, medium) = shared_store(MemoryMedium::new());
        medium.seed(config::CASES_STORAGE_KEY, "{not json").unwrap();

        assert!(matches!(
            store.create(&make_case("a", "Ada")),
            Err(StorageError::Serialization(_))
        ));
        assert!(store.update(&make_case("a", "Ada")).is_err());
        assert!(store.delete("a").is_err());
        assert_eq!(
            medium.read(config::CASES_STORAGE_KEY).unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn file_default_uses_cases_key() {
        let store = CaseStore::open_file_default();
        assert_eq!(store.key(), config::CASES_STORAGE_KEY);
    }

    #[test]
    fn failed_write_keeps_prior_collection() {
        let (store, medium) = shared_store(MemoryMedium::with_quota(2_000));
        store.create(&make_case("a", "Ada")).unwrap();
        let before = store.load_all();

        let mut big = make_case("b", "Bo");
        big.notes[0].content = "x".repeat(4_000);
        let err = store.create(&big).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(store.load_all(), before);

        medium.set_available(false);
        assert!(matches!(
            store.update(&make_case("a", "Ada")),
            Err(StorageError::Unavailable(_))
        ));
    }

    #[test]
    fn script_content_round_trips_encoded() {
        let store = CaseStore::new(MemoryMedium::new());
        let mut case = make_case("a", "Ada");
        case.notes[0].content = "<script>alert(1)</script>".into();
        store.create(&case).unwrap();

        let stored = store.load_all().remove(0);
        assert_eq!(stored.notes[0].content, "&lt;script&gt;alert(1)&lt;/script&gt;");

        // Re-saving what was loaded does not double-encode.
        let cases = store.update(&stored).unwrap();
        assert_eq!(cases[0].notes[0].content, stored.notes[0].content);
    }

    #[test]
    fn structured_fields_round_trip_exactly() {
        let store = CaseStore::new(MemoryMedium::new());
        let mut case = make_case("a", "Ada");
        case.result = Some(AnalysisResult {
            patient_trajectory_summary: "Improving <slowly>".into(),
            critical_conflicts: vec![Conflict {
                id: "c1".into(),
                description: "Dose <mismatch>".into(),
                severity: Severity::High,
                source_ids: vec!["n1".into()],
                reasoning: String::new(),
                why_it_matters: String::new(),
                confidence: Confidence::Medium,
                excerpts: Vec::new(),
            }],
            potentially_missing_information: Vec::new(),
            timeline_events: Vec::new(),
            analysis_confidence: None,
        });
        case.dismissed_flags.insert(
            "c1".into(),
            DismissalRecord::new("c1", DismissalReason::Addressed).with_note("called pharmacy"),
        );
        case.history.push(CaseHistoryEvent {
            timestamp: Utc::now(),
            action: "CASE_CREATED".into(),
            details: None,
        });

        store.create(&case).unwrap();
        let stored = store.load_all().remove(0);
        assert_eq!(stored.result, case.result);
        assert_eq!(stored.dismissed_flags, case.dismissed_flags);
        assert_eq!(stored.history, case.history);
        assert_eq!(stored.timestamp, case.timestamp);
    }

    #[test]
    fn search_matches_name_patient_and_mrn() {
        let cases = vec![make_case("a", "Ada Lovelace"), make_case("b", "Bo Diddley")];
        assert_eq!(search_cases(&cases, "").len(), 2);
        assert_eq!(search_cases(&cases, "lovelace")[0].id, "a");
        assert_eq!(search_cases(&cases, "mrn-b")[0].id, "b");
        assert!(search_cases(&cases, "nobody").is_empty());
    }

    #[test]
    fn file_and_sqlite_media_back_the_same_contract() {
        let tmp = tempfile::tempdir().unwrap();
        let stores = [
            CaseStore::new(FileMedium::new(tmp.path().join("files"))),
            CaseStore::new(SqliteMedium::open(&tmp.path().join("cases.db")).unwrap()),
        ];
        for store in stores {
            store.create(&make_case("a", "Ada")).unwrap();
            store.create(&make_case("b", "Bo")).unwrap();
            store.delete("a").unwrap();
            let summaries = store.summaries();
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].patient_name, "Bo");
            assert!(store.find("b").is_some());
        }
    }
}
