//! Remote store error types.

/// Failure of a call against the shared backend.
///
/// The variants keep "could not reach the backend" apart from "the backend
/// said no", because only the former may be recovered by falling back to the
/// local store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Rejected by server ({status}): {message}")]
    PolicyRejected { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => RemoteError::PolicyRejected { status, message },
            404 | 410 => RemoteError::NotFound(message),
            _ => RemoteError::Server { status, message },
        }
    }

    /// HTTP-like status for this failure. Network failures have none.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::NetworkUnavailable(_) => None,
            RemoteError::PolicyRejected { status, .. } | RemoteError::Server { status, .. } => {
                Some(*status)
            }
            RemoteError::NotFound(_) => Some(404),
            RemoteError::InvalidResponse(_) => Some(502),
        }
    }

    /// True for failures the local store may stand in for: the backend was
    /// unreachable or failed on its own side.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::NetworkUnavailable(_) => true,
            RemoteError::Server { status, .. } => *status >= 500,
            RemoteError::PolicyRejected { .. }
            | RemoteError::NotFound(_)
            | RemoteError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::from_status(status.as_u16(), e.to_string())
        } else {
            // Connect failures, timeouts and broken bodies.
            RemoteError::NetworkUnavailable(e.to_string())
        }
    }
}
