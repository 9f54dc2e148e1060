//! Server-side modules for the Babytrack backend.

pub mod auth;
pub mod realtime;
mod routes;
pub mod storage;

pub use auth::{ApiKeyEntry, ApiKeyStore, AuthUser};
pub use realtime::RealtimeHub;
pub use routes::router;
pub use storage::{ServerStorage, ServerStorageError};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct ServerState {
    pub storage: Arc<ServerStorage>,
    pub hub: Arc<RealtimeHub>,
    pub api_keys: Arc<ApiKeyStore>,
}
