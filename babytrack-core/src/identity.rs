//! Caregiver identity as seen by the data layer.
//!
//! Sign-in happens elsewhere; the data layer only needs to know who the
//! current caregiver is, or that nobody is signed in.

use serde::{Deserialize, Serialize};

/// An authenticated caregiver and the bearer token used for remote calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Caregiver {
    pub id: String,
    pub token: String,
}

impl Caregiver {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Caregiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caregiver")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Response from the `/me` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let caregiver = Caregiver::new("cg-1", "secret-token");
        let debug = format!("{:?}", caregiver);
        assert!(debug.contains("cg-1"));
        assert!(!debug.contains("secret-token"));
    }
}
