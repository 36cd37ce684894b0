// flat-file/src/rollback.rs

use std::fmt;

/// A rollback step that failed without stopping the rollback.
///
/// The write cursor is repositioned regardless, so whatever bytes a failed
/// step left behind sit past the cursor and are overwritten or ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackWarning {
    CloseFailed { file_number: u32, reason: String },
    DeleteFailed { file_number: u32, reason: String },
    ReopenFailed { file_number: u32, reason: String },
    TruncateFailed { file_number: u32, reason: String },
}

impl RollbackWarning {
    pub fn file_number(&self) -> u32 {
        match self {
            RollbackWarning::CloseFailed { file_number, .. }
            | RollbackWarning::DeleteFailed { file_number, .. }
            | RollbackWarning::ReopenFailed { file_number, .. }
            | RollbackWarning::TruncateFailed { file_number, .. } => *file_number,
        }
    }
}

impl fmt::Display for RollbackWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackWarning::CloseFailed { file_number, reason } => {
                write!(f, "failed to close file {}: {}", file_number, reason)
            }
            RollbackWarning::DeleteFailed { file_number, reason } => {
                write!(f, "failed to delete file {}: {}", file_number, reason)
            }
            RollbackWarning::ReopenFailed { file_number, reason } => {
                write!(f, "failed to reopen file {}: {}", file_number, reason)
            }
            RollbackWarning::TruncateFailed { file_number, reason } => {
                write!(f, "failed to truncate file {}: {}", file_number, reason)
            }
        }
    }
}

/// Result of a rollback that reached its target position
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Completed,
    CompletedWithWarnings(Vec<RollbackWarning>),
}

impl RollbackOutcome {
    pub(crate) fn from_warnings(warnings: Vec<RollbackWarning>) -> Self {
        if warnings.is_empty() {
            RollbackOutcome::Completed
        } else {
            RollbackOutcome::CompletedWithWarnings(warnings)
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, RollbackOutcome::Completed)
    }

    pub fn warnings(&self) -> &[RollbackWarning] {
        match self {
            RollbackOutcome::Completed => &[],
            RollbackOutcome::CompletedWithWarnings(warnings) => warnings,
        }
    }
}
