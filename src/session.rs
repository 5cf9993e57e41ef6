//! Case session: the in-memory working set bound to an optional stored case.
//!
//! `CaseSession` owns patient details, notes, the latest analysis result,
//! the conflict ledger and the audit log, and mediates save/load/reset/delete
//! against the `CaseStore`. Every working-set mutation goes through a method
//! here so it can be paired with its audit event.
//!
//! Lifecycle: `New` → `Dirty` on any mutation → `Saved` after a successful
//! save or a load → `Dirty` again on the next mutation. `reset` returns to
//! `New`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::export::ExportView;
use crate::ledger::{ConflictLedger, Disposition, ValidationError};
use crate::models::{
    AnalysisResult, Case, CaseAction, CaseHistoryEvent, DismissalReason, DismissalRecord, Note,
    PatientDetails, SeverityCounts,
};
use crate::store::{CaseStore, StorageError};

const UNTITLED_CASE: &str = "Untitled case";

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No identity, no unsaved edits.
    New,
    /// Unsaved edits present.
    Dirty,
    /// Mirrors the stored case.
    Saved,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("A save is already in progress")]
    SaveInProgress,

    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Persistence task failed: {0}")]
    TaskFailed(String),
}

/// Result of a successful save.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// Snapshot handed to the store (before sanitization).
    pub case: Case,
    /// True when this save created the stored record.
    pub created: bool,
    /// Refreshed stored collection.
    pub cases: Vec<Case>,
}

struct WorkingSet {
    case_id: Option<String>,
    name: String,
    patient_details: PatientDetails,
    notes: Vec<Note>,
    result: Option<AnalysisResult>,
    ledger: ConflictLedger,
    audit: AuditLog,
    status: SessionStatus,
    last_saved: Option<DateTime<Utc>>,
    /// Bumped on every mutation; a save only reports `Saved` if unchanged.
    revision: u64,
    /// Bumped when the working set is replaced (load/reset).
    generation: u64,
}

impl WorkingSet {
    fn empty(generation: u64) -> Self {
        Self {
            case_id: None,
            name: String::new(),
            patient_details: PatientDetails::default(),
            notes: Vec::new(),
            result: None,
            ledger: ConflictLedger::new(),
            audit: AuditLog::new(),
            status: SessionStatus::New,
            last_saved: None,
            revision: 0,
            generation,
        }
    }

    fn from_case(case: Case, generation: u64) -> Self {
        Self {
            case_id: Some(case.id),
            name: case.name,
            patient_details: case.patient_details,
            notes: case.notes,
            result: case.result,
            ledger: ConflictLedger::from_flags(case.dismissed_flags),
            audit: AuditLog::from_events(case.history),
            status: SessionStatus::Saved,
            last_saved: Some(case.timestamp),
            revision: 0,
            generation,
        }
    }

    /// Record a mutation: audit event, new revision, `Dirty`.
    fn touch(&mut self, action: CaseAction, details: Option<String>) {
        self.audit.record(action, details);
        self.revision += 1;
        self.status = SessionStatus::Dirty;
    }

    fn display_name(&self) -> String {
        if !self.name.trim().is_empty() {
            self.name.clone()
        } else if !self.patient_details.name.trim().is_empty() {
            self.patient_details.name.clone()
        } else {
            UNTITLED_CASE.to_string()
        }
    }

    fn to_case(&self, id: String, timestamp: DateTime<Utc>) -> Case {
        Case {
            id,
            name: self.display_name(),
            patient_details: self.patient_details.clone(),
            notes: self.notes.clone(),
            result: self.result.clone(),
            dismissed_flags: self.ledger.flags().clone(),
            timestamp,
            history: self.audit.to_vec(),
        }
    }

    fn note_label(&self, note_id: &str) -> String {
        self.notes
            .iter()
            .find(|n| n.id == note_id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| note_id.to_string())
    }
}

/// Marks a store operation in flight; released on drop, including when the
/// owning future is cancelled.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::SaveInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════
// CaseSession
// ═══════════════════════════════════════════════════════════

pub struct CaseSession {
    store: Arc<CaseStore>,
    working: Mutex<WorkingSet>,
    in_flight: AtomicBool,
}

impl CaseSession {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self {
            store,
            working: Mutex::new(WorkingSet::empty(0)),
            in_flight: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorkingSet>, SessionError> {
        self.working.lock().map_err(|_| SessionError::LockPoisoned)
    }

    // ── Read path ──────────────────────────────────────────

    pub fn status(&self) -> Result<SessionStatus, SessionError> {
        Ok(self.lock()?.status)
    }

    /// Durable identity, once the case has been saved or loaded.
    pub fn case_id(&self) -> Result<Option<String>, SessionError> {
        Ok(self.lock()?.case_id.clone())
    }

    pub fn name(&self) -> Result<String, SessionError> {
        Ok(self.lock()?.display_name())
    }

    pub fn patient_details(&self) -> Result<PatientDetails, SessionError> {
        Ok(self.lock()?.patient_details.clone())
    }

    pub fn notes(&self) -> Result<Vec<Note>, SessionError> {
        Ok(self.lock()?.notes.clone())
    }

    pub fn result(&self) -> Result<Option<AnalysisResult>, SessionError> {
        Ok(self.lock()?.result.clone())
    }

    pub fn dismissed_flags(&self) -> Result<BTreeMap<String, DismissalRecord>, SessionError> {
        Ok(self.lock()?.ledger.flags().clone())
    }

    pub fn disposition(&self, conflict_id: &str) -> Result<Disposition, SessionError> {
        Ok(self.lock()?.ledger.disposition(conflict_id))
    }

    /// Audit trail, oldest first.
    pub fn history(&self) -> Result<Vec<CaseHistoryEvent>, SessionError> {
        Ok(self.lock()?.audit.to_vec())
    }

    pub fn history_newest_first(&self) -> Result<Vec<CaseHistoryEvent>, SessionError> {
        Ok(self.lock()?.audit.newest_first().cloned().collect())
    }

    pub fn last_saved(&self) -> Result<Option<DateTime<Utc>>, SessionError> {
        Ok(self.lock()?.last_saved)
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current working set as a case. The id is empty until first save.
    pub fn snapshot(&self) -> Result<Case, SessionError> {
        let ws = self.lock()?;
        Ok(ws.to_case(ws.case_id.clone().unwrap_or_default(), Utc::now()))
    }

    pub fn export_view(&self) -> Result<ExportView, SessionError> {
        let ws = self.lock()?;
        Ok(ExportView::build(
            &ws.patient_details,
            &ws.notes,
            ws.result.as_ref(),
            &ws.ledger,
        ))
    }

    // ── Working-set mutations ──────────────────────────────

    pub fn set_case_name(&self, name: &str) -> Result<(), SessionError> {
        let mut ws = self.lock()?;
        if ws.name == name {
            return Ok(());
        }
        ws.name = name.to_string();
        ws.touch(CaseAction::CaseRenamed, Some(name.to_string()));
        Ok(())
    }

    pub fn set_patient_details(&self, details: PatientDetails) -> Result<(), SessionError> {
        let mut ws = self.lock()?;
        if ws.patient_details == details {
            return Ok(());
        }
        ws.patient_details = details;
        ws.touch(CaseAction::DetailsUpdated, None);
        Ok(())
    }

    pub fn add_note(&self, note: Note) -> Result<(), SessionError> {
        let mut ws = self.lock()?;
        let details = format!("{} ({})", note.label, note.kind);
        ws.notes.push(note);
        ws.touch(CaseAction::NoteAdded, Some(details));
        Ok(())
    }

    /// Replace a note's content. Returns false when nothing changed.
    pub fn update_note_content(&self, note_id: &str, content: &str) -> Result<bool, SessionError> {
        let mut ws = self.lock()?;
        let note = ws
            .notes
            .iter_mut()
            .find(|n| n.id == note_id)
            .ok_or_else(|| SessionError::NoteNotFound(note_id.to_string()))?;
        if note.content == content {
            return Ok(false);
        }
        note.content = content.to_string();
        let label = note.label.clone();
        ws.touch(CaseAction::NoteEdited, Some(label));
        Ok(true)
    }

    pub fn remove_note(&self, note_id: &str) -> Result<Note, SessionError> {
        let mut ws = self.lock()?;
        let position = ws
            .notes
            .iter()
            .position(|n| n.id == note_id)
            .ok_or_else(|| SessionError::NoteNotFound(note_id.to_string()))?;
        let note = ws.notes.remove(position);
        ws.touch(CaseAction::NoteRemoved, Some(note.label.clone()));
        Ok(note)
    }

    /// Install a new analysis result. Dispositions for conflicts that no
    /// longer exist are dropped.
    pub fn set_analysis_result(&self, result: AnalysisResult) -> Result<SeverityCounts, SessionError> {
        let mut guard = self.lock()?;
        let ws = &mut *guard;
        let result = result.normalized();
        let counts = result.severity_counts();

        let dropped = ws.ledger.retain_known(result.conflict_ids());
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Dropped dispositions for conflicts no longer reported");
        }
        ws.result = Some(result);
        ws.touch(
            CaseAction::AnalysisCompleted,
            Some(format!(
                "{} conflicts ({} high, {} medium, {} low)",
                counts.total, counts.high, counts.medium, counts.low
            )),
        );
        Ok(counts)
    }

    pub fn dismiss_conflict(
        &self,
        conflict_id: &str,
        reason: DismissalReason,
        note: Option<String>,
    ) -> Result<DismissalRecord, SessionError> {
        let mut guard = self.lock()?;
        let ws = &mut *guard;
        let known = ws
            .result
            .as_ref()
            .is_some_and(|r| r.conflict(conflict_id).is_some());
        if !conflict_id.trim().is_empty() && !known {
            return Err(ValidationError::UnknownConflict(conflict_id.to_string()).into());
        }

        let mut record = DismissalRecord::new(conflict_id, reason);
        record.note = note;
        ws.ledger.dismiss(record.clone())?;
        ws.touch(
            CaseAction::ConflictDismissed,
            Some(format!("{conflict_id}: {reason}")),
        );
        Ok(record)
    }

    /// Mark `source_id` as the correct source for a conflict.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        source_id: &str,
    ) -> Result<DismissalRecord, SessionError> {
        let mut guard = self.lock()?;
        let ws = &mut *guard;
        let conflict = ws
            .result
            .as_ref()
            .and_then(|r| r.conflict(conflict_id))
            .ok_or_else(|| ValidationError::UnknownConflict(conflict_id.to_string()))?;
        let label = ws.note_label(source_id);
        let record = ws.ledger.resolve(conflict, source_id, &label)?.clone();
        ws.touch(
            CaseAction::ConflictResolved,
            Some(format!("{conflict_id}: {label}")),
        );
        Ok(record)
    }

    /// Return a conflict to active. Returns false if it was not dismissed.
    pub fn restore_conflict(&self, conflict_id: &str) -> Result<bool, SessionError> {
        let mut ws = self.lock()?;
        if ws.ledger.restore(conflict_id).is_none() {
            return Ok(false);
        }
        ws.touch(CaseAction::ConflictRestored, Some(conflict_id.to_string()));
        Ok(true)
    }

    // ── Lifecycle ──────────────────────────────────────────

    /// Discard identity and all in-memory edits.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut ws = self.lock()?;
        let generation = ws.generation + 1;
        *ws = WorkingSet::empty(generation);
        tracing::info!("Case session reset");
        Ok(())
    }

    /// Replace the working set with a stored case.
    pub fn load(&self, case: Case) -> Result<(), SessionError> {
        if self.is_saving() {
            return Err(SessionError::SaveInProgress);
        }
        let mut ws = self.lock()?;
        let generation = ws.generation + 1;
        let case_id = case.id.clone();
        let name = case.name.clone();
        *ws = WorkingSet::from_case(case, generation);
        ws.audit.record(CaseAction::CaseLoaded, Some(name));
        tracing::info!(case_id = %case_id, "Case loaded");
        Ok(())
    }

    /// Persist the working set: create on first save, update afterwards.
    ///
    /// The `CASE_CREATED`/`CASE_UPDATED` event is appended before the store
    /// call so it is part of the persisted snapshot. On failure the working
    /// set is kept as-is and the save can be retried.
    pub async fn save(&self) -> Result<SaveOutcome, SessionError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        let (snapshot, created, generation, revision) = {
            let mut ws = self.lock()?;
            let created = ws.case_id.is_none();
            let id = ws
                .case_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            if ws.name.trim().is_empty() {
                ws.name = ws.display_name();
            }
            let action = if created {
                CaseAction::CaseCreated
            } else {
                CaseAction::CaseUpdated
            };
            let name = ws.name.clone();
            ws.audit.record(action, Some(name));
            (ws.to_case(id, Utc::now()), created, ws.generation, ws.revision)
        };

        let case = snapshot.clone();
        let cases = self
            .run_store(move |store| {
                if created {
                    store.create(&case)
                } else {
                    store.update(&case)
                }
            })
            .await?
            .inspect_err(|e| tracing::warn!(case_id = %snapshot.id, error = %e, "Case save failed"))?;

        {
            let mut ws = self.lock()?;
            if ws.generation == generation {
                if created {
                    ws.case_id = Some(snapshot.id.clone());
                }
                ws.last_saved = Some(snapshot.timestamp);
                ws.status = if ws.revision == revision {
                    SessionStatus::Saved
                } else {
                    SessionStatus::Dirty
                };
            }
        }

        tracing::info!(case_id = %snapshot.id, created, "Case saved");
        Ok(SaveOutcome {
            case: snapshot,
            created,
            cases,
        })
    }

    /// Delete a stored case. If it is the bound case, the working set stays
    /// live but loses its identity, so the next save creates a new record.
    pub async fn delete(&self, id: &str) -> Result<Vec<Case>, SessionError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        let target = id.to_string();
        let cases = self.run_store(move |store| store.delete(&target)).await??;

        let mut ws = self.lock()?;
        if ws.case_id.as_deref() == Some(id) {
            ws.case_id = None;
            ws.last_saved = None;
            ws.touch(CaseAction::CaseDeleted, Some(id.to_string()));
            tracing::info!(case_id = id, "Bound case deleted, session detached");
        }
        Ok(cases)
    }

    pub async fn list_cases(&self) -> Result<Vec<Case>, SessionError> {
        self.run_store(|store| store.load_all()).await
    }

    /// Load the stored case with `id` into the session.
    pub async fn open_case(&self, id: &str) -> Result<Case, SessionError> {
        let case = self
            .list_cases()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| SessionError::CaseNotFound(id.to_string()))?;
        self.load(case.clone())?;
        Ok(case)
    }

    async fn run_store<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&CaseStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| SessionError::TaskFailed(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
