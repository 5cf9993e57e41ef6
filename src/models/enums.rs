use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unknown string tag for one of the closed enums below.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid value for {field}: {value}")]
pub struct ParseEnumError {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string tag doubles as the serde wire name.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ParseEnumError {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(
    /// How a source note was ingested.
    NoteKind {
        Text => "text",
        Image => "image",
        Audio => "audio",
    }
);

str_enum!(
    /// Ingestion state of a source note.
    NoteStatus {
        Processing => "processing",
        Ready => "ready",
        Error => "error",
    }
);

str_enum!(Severity {
    High => "HIGH",
    Medium => "MEDIUM",
    Low => "LOW",
});

str_enum!(Confidence {
    High => "HIGH",
    Medium => "MEDIUM",
    Low => "LOW",
});

str_enum!(
    /// Why a conflict was taken out of the active list.
    DismissalReason {
        NotRelevant => "NOT_RELEVANT",
        FalsePositive => "FALSE_POSITIVE",
        Addressed => "ADDRESSED",
        DocError => "DOC_ERROR",
        Resolved => "RESOLVED",
        Other => "OTHER",
    }
);

str_enum!(
    /// Audit trail action tags. Persisted events keep the raw string so
    /// tags written by other versions still load.
    CaseAction {
        CaseCreated => "CASE_CREATED",
        CaseUpdated => "CASE_UPDATED",
        CaseLoaded => "CASE_LOADED",
        CaseDeleted => "CASE_DELETED",
        CaseRenamed => "CASE_RENAMED",
        DetailsUpdated => "DETAILS_UPDATED",
        NoteAdded => "NOTE_ADDED",
        NoteEdited => "NOTE_EDITED",
        NoteRemoved => "NOTE_REMOVED",
        AnalysisCompleted => "ANALYSIS_COMPLETED",
        ConflictDismissed => "CONFLICT_DISMISSED",
        ConflictResolved => "CONFLICT_RESOLVED",
        ConflictRestored => "CONFLICT_RESTORED",
    }
);
