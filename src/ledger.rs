//! Conflict dispositions for the case in memory.
//!
//! The ledger maps conflict id to its `DismissalRecord`. A conflict absent
//! from the map is active. Dismissing an already-dismissed conflict
//! overwrites the record. The ledger never logs to the audit trail; the
//! session pairs each mutation with an audit event.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Conflict, DismissalReason, DismissalRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Dismissal record has an empty conflict id")]
    EmptyConflictId,

    #[error("Source {source_id} is not one of the sources of conflict {conflict_id}")]
    InvalidReference {
        conflict_id: String,
        source_id: String,
    },

    #[error("Conflict not found in the current analysis: {0}")]
    UnknownConflict(String),
}

/// Display-level status of one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Active,
    Dismissed,
    /// A dismissal whose reason is `RESOLVED`.
    Resolved,
}

/// Conflicts split by disposition, preserving input order.
#[derive(Debug, Clone, Default)]
pub struct ConflictPartition<'a> {
    pub active: Vec<&'a Conflict>,
    pub dismissed: Vec<&'a Conflict>,
    pub resolved: Vec<&'a Conflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictLedger {
    flags: BTreeMap<String, DismissalRecord>,
}

impl ConflictLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flags(flags: BTreeMap<String, DismissalRecord>) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &BTreeMap<String, DismissalRecord> {
        &self.flags
    }

    pub fn into_flags(self) -> BTreeMap<String, DismissalRecord> {
        self.flags
    }

    pub fn get(&self, conflict_id: &str) -> Option<&DismissalRecord> {
        self.flags.get(conflict_id)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Insert or overwrite the record for `record.conflict_id`.
    pub fn dismiss(
        &mut self,
        record: DismissalRecord,
    ) -> Result<&BTreeMap<String, DismissalRecord>, ValidationError> {
        if record.conflict_id.trim().is_empty() {
            return Err(ValidationError::EmptyConflictId);
        }
        tracing::debug!(
            conflict_id = %record.conflict_id,
            reason = record.reason.as_str(),
            "Conflict dismissed"
        );
        self.flags.insert(record.conflict_id.clone(), record);
        Ok(&self.flags)
    }

    /// Remove the record for `conflict_id`. Absent ids are a no-op.
    pub fn restore(&mut self, conflict_id: &str) -> Option<DismissalRecord> {
        let removed = self.flags.remove(conflict_id);
        if removed.is_some() {
            tracing::debug!(conflict_id, "Conflict restored to active");
        }
        removed
    }

    /// Mark `source_id` as the correct source for `conflict`.
    ///
    /// Fails with `InvalidReference` when the source is not one of the
    /// conflict's sources; the ledger is left unchanged.
    pub fn resolve(
        &mut self,
        conflict: &Conflict,
        source_id: &str,
        source_label: &str,
    ) -> Result<&DismissalRecord, ValidationError> {
        let record = resolution_record(conflict, source_id, source_label, Utc::now())?;
        tracing::debug!(conflict_id = %record.conflict_id, source_id, "Conflict resolved");
        Ok(match self.flags.entry(record.conflict_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(record);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(record),
        })
    }

    pub fn disposition(&self, conflict_id: &str) -> Disposition {
        match self.flags.get(conflict_id) {
            None => Disposition::Active,
            Some(record) if record.is_resolution() => Disposition::Resolved,
            Some(_) => Disposition::Dismissed,
        }
    }

    pub fn is_active(&self, conflict_id: &str) -> bool {
        !self.flags.contains_key(conflict_id)
    }

    pub fn partition<'a>(&self, conflicts: &'a [Conflict]) -> ConflictPartition<'a> {
        let mut partition = ConflictPartition::default();
        for conflict in conflicts {
            match self.disposition(&conflict.id) {
                Disposition::Active => partition.active.push(conflict),
                Disposition::Dismissed => partition.dismissed.push(conflict),
                Disposition::Resolved => partition.resolved.push(conflict),
            }
        }
        partition
    }

    /// Drop records whose conflict no longer exists. Returns the dropped ids.
    pub fn retain_known<'a>(&mut self, known_ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let known: HashSet<&str> = known_ids.into_iter().collect();
        let stale: Vec<String> = self
            .flags
            .keys()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &stale {
            self.flags.remove(id);
        }
        stale
    }
}

/// Note text credited to the source chosen as correct.
pub fn resolution_note(source_label: &str) -> String {
    format!("Resolved in favour of {source_label}")
}

/// Derive the `RESOLVED` record for marking `source_id` correct.
pub fn resolution_record(
    conflict: &Conflict,
    source_id: &str,
    source_label: &str,
    timestamp: DateTime<Utc>,
) -> Result<DismissalRecord, ValidationError> {
    if conflict.id.trim().is_empty() {
        return Err(ValidationError::EmptyConflictId);
    }
    if !conflict.references_source(source_id) {
        return Err(ValidationError::InvalidReference {
            conflict_id: conflict.id.clone(),
            source_id: source_id.to_string(),
        });
    }
    Ok(DismissalRecord {
        conflict_id: conflict.id.clone(),
        reason: DismissalReason::Resolved,
        note: Some(resolution_note(source_label)),
        resolution_source_id: Some(source_id.to_string()),
        timestamp,
    })
}
