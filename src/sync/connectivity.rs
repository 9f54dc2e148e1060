use std::sync::Arc;

use babytrack_core::check_server;
use tokio::sync::watch;

/// Shared online/offline flag. Observers are woken on every transition.
#[derive(Debug, Clone)]
pub struct Connectivity {
    state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            state: Arc::new(watch::Sender::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records the current state. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Checks the server's health endpoint and records the result.
    pub async fn check_health(&self, server_url: &str) -> bool {
        let reachable = check_server(server_url).await;
        self.set_online(reachable);
        reachable
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_wake_watchers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.watch();

        assert!(!connectivity.set_online(false));
        assert!(connectivity.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_unreachable_server_goes_offline() {
        let connectivity = Connectivity::new(true);
        assert!(!connectivity.check_health("http://127.0.0.1:9").await);
        assert!(!connectivity.is_online());
    }
}
