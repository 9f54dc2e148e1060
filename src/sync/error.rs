use babytrack_core::{ExportError, ModelError, RemoteError};

use crate::db::LocalStoreError;

/// Error type for data service operations.
#[derive(Debug)]
pub enum SyncError {
    /// The backend refused or failed the call and no fallback applied.
    Remote(RemoteError),
    /// The local store failed; fatal to the operation.
    LocalStorage(LocalStoreError),
    /// No such record at the tier that served the call.
    NotFound(String),
    /// The input or a stored record is not a valid domain value.
    Model(ModelError),
    Export(ExportError),
    /// A sync pass finished but some records were not pushed.
    PartialFailure { failed: usize },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Remote(e) => write!(f, "{}", e),
            SyncError::LocalStorage(e) => write!(f, "{}", e),
            SyncError::NotFound(what) => write!(f, "Not found: {}", what),
            SyncError::Model(e) => write!(f, "Invalid record: {}", e),
            SyncError::Export(e) => write!(f, "Export failed: {}", e),
            SyncError::PartialFailure { failed } => {
                write!(f, "Sync incomplete: {} record(s) failed", failed)
            }
        }
    }
}

impl std::error::Error for SyncError {}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(what) => SyncError::NotFound(what),
            other => SyncError::Remote(other),
        }
    }
}

impl From<LocalStoreError> for SyncError {
    fn from(e: LocalStoreError) -> Self {
        match e {
            LocalStoreError::NotFound(what) => SyncError::NotFound(what),
            other => SyncError::LocalStorage(other),
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(e: ModelError) -> Self {
        SyncError::Model(e)
    }
}

impl From<ExportError> for SyncError {
    fn from(e: ExportError) -> Self {
        SyncError::Export(e)
    }
}

impl SyncError {
    /// True when the backend explicitly denied the call.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::PolicyRejected { .. }))
    }
}
