//! Append-only audit trail of case-level actions.
//!
//! Events are stored chronologically. There is no way to edit or remove an
//! event once appended; the only bulk operation is rehydrating from a
//! persisted case.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{CaseAction, CaseHistoryEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    events: Vec<CaseHistoryEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate from a persisted case history.
    pub fn from_events(events: Vec<CaseHistoryEvent>) -> Self {
        Self { events }
    }

    /// Append an event stamped with the current time.
    pub fn append(&mut self, action: &str, details: Option<String>) -> &CaseHistoryEvent {
        tracing::debug!(action, "Audit event appended");
        let index = self.events.len();
        self.events.push(CaseHistoryEvent {
            timestamp: Utc::now(),
            action: action.to_string(),
            details,
        });
        &self.events[index]
    }

    pub fn record(&mut self, action: CaseAction, details: Option<String>) -> &CaseHistoryEvent {
        self.append(action.as_str(), details)
    }

    /// Stored events, oldest first.
    pub fn events(&self) -> &[CaseHistoryEvent] {
        &self.events
    }

    /// Display order.
    pub fn newest_first(&self) -> impl Iterator<Item = &CaseHistoryEvent> {
        self.events.iter().rev()
    }

    pub fn last(&self) -> Option<&CaseHistoryEvent> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_vec(&self) -> Vec<CaseHistoryEvent> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_chronological_order() {
        let mut log = AuditLog::new();
        log.record(CaseAction::NoteAdded, Some("Discharge summary".to_string()));
        log.record(CaseAction::ConflictDismissed, None);
        log.append("CUSTOM_TAG", Some("from a newer build".into()));

        let actions: Vec<&str> = log.events().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["NOTE_ADDED", "CONFLICT_DISMISSED", "CUSTOM_TAG"]);
        assert!(log.events()[0].timestamp <= log.events()[2].timestamp);
    }

    #[test]
    fn newest_first_reverses_without_mutating() {
        let mut log = AuditLog::new();
        log.record(CaseAction::CaseCreated, None);
        log.record(CaseAction::CaseUpdated, None);

        let newest: Vec<&str> = log.newest_first().map(|e| e.action.as_str()).collect();
        assert_eq!(newest, vec!["CASE_UPDATED", "CASE_CREATED"]);
        assert_eq!(log.events()[0].action, "CASE_CREATED");
    }

    #[test]
    fn survives_serialization_round_trip() {
        let mut log = AuditLog::new();
        log.record(CaseAction::AnalysisCompleted, Some("3 conflicts".to_string()));
        log.record(CaseAction::CaseCreated, None);

        let json = serde_json::to_string(&log).unwrap();
        let back: AuditLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
        assert!(json.starts_with('['));
    }

    #[test]
    fn details_are_optional_on_the_wire() {
        let mut log = AuditLog::new();
        log.record(CaseAction::CaseLoaded, None);
        let json = serde_json::to_value(&log).unwrap();
        assert!(json[0].get("details").is_none());
        assert_eq!(log.last().map(|e| e.action.as_str()), Some("CASE_LOADED"));
    }
}
