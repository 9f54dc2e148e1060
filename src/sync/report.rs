use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::SyncError;
use crate::db::RecordKind;

/// A record the sync pass could not push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub kind: &'static str,
    pub id: Uuid,
    pub message: String,
}

impl SyncFailure {
    pub fn new(kind: RecordKind, id: Uuid, error: impl fmt::Display) -> Self {
        Self {
            kind: kind.as_str(),
            id,
            message: error.to_string(),
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// The pass did not run: offline or nobody signed in.
    pub skipped: bool,
    pub babies_pushed: usize,
    pub entries_pushed: usize,
    pub deletions_pushed: usize,
    /// Local rows dropped because the backend had tombstoned them.
    pub removed_locally: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn fail(&mut self, failure: SyncFailure) {
        tracing::warn!(
            "Failed to sync {} {}: {}",
            failure.kind,
            failure.id,
            failure.message
        );
        self.failures.push(failure);
    }

    /// Turns a pass with failures into [`SyncError::PartialFailure`].
    pub fn into_result(self) -> Result<SyncReport, SyncError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(SyncError::PartialFailure {
                failed: self.failures.len(),
            })
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "skipped (offline or not signed in)");
        }
        write!(
            f,
            "{} babies, {} entries, {} deletions pushed",
            self.babies_pushed, self.entries_pushed, self.deletions_pushed
        )?;
        if self.removed_locally > 0 {
            write!(f, ", {} removed locally", self.removed_locally)?;
        }
        if !self.failures.is_empty() {
            write!(f, ", {} failed", self.failures.len())?;
        }
        Ok(())
    }
}
