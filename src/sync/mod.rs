//! Offline-first synchronization between the local store and the backend.
//!
//! - [`DataService`]: the single seam for reads and writes, with remote-first
//!   routing, local fallback and the reconnect sync pass.
//! - [`Connectivity`]: shared online/offline state.
//! - [`AutoSync`]: background passes on reconnect and on an interval.
//! - [`try_auto_sync`]: one-shot pass for CLI commands.

mod auto_sync;
mod connectivity;
mod error;
mod report;
mod service;
#[cfg(test)]
pub(crate) mod testing;

pub use auto_sync::AutoSync;
pub use connectivity::Connectivity;
pub use error::SyncError;
pub use report::{SyncFailure, SyncReport};
pub use service::{DataService, DEFAULT_RECORD_TIMEOUT};

use babytrack_core::HttpRemoteStore;

use crate::config::Config;
use crate::db::LocalStore;

/// The service as the CLI and embedding applications use it.
pub type HttpDataService = DataService<HttpRemoteStore>;

/// Opens the local store and wires a service to the configured backend.
/// Connectivity starts offline without a server URL, otherwise it reflects a
/// health check.
pub async fn open_service(config: &Config) -> Result<HttpDataService, SyncError> {
    let local = LocalStore::open(Some(config.database_path.value.clone())).await?;
    let connectivity = Connectivity::new(false);
    let server_url = config.sync.server_url.clone().unwrap_or_default();
    if !server_url.is_empty() && config.caregiver().is_some() {
        connectivity.check_health(&server_url).await;
    }

    Ok(
        DataService::new(local, HttpRemoteStore::new(server_url), connectivity)
            .with_identity(config.caregiver())
            .with_record_timeout(config.sync.record_timeout()),
    )
}

/// Runs one sync pass if auto-sync is enabled and the server is reachable.
///
/// Failures are reported on stderr and otherwise ignored; commands keep
/// working offline.
pub async fn try_auto_sync(config: &Config, service: &HttpDataService) {
    if !config.sync.auto_sync || !config.is_sync_configured() {
        return;
    }
    if !service.connectivity().is_online() {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    match service.sync().await {
        Ok(report) if !report.failures.is_empty() => {
            eprintln!("Auto-sync: {}", report);
        }
        Ok(_) => {}
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
