//! Background sync scheduling.
//!
//! [`AutoSync`] runs a sync pass at startup when online, whenever
//! connectivity goes from offline to online, and on every interval tick
//! while online. With a server URL it also checks the health endpoint on each
//! tick, which is how a service that went offline notices the backend is back.

use std::sync::Arc;
use std::time::Duration;

use babytrack_core::RemoteStore;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::DataService;

pub struct AutoSync {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AutoSync {
    pub fn spawn<R: RemoteStore + 'static>(
        service: Arc<DataService<R>>,
        interval: Duration,
        health_url: Option<String>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let online = service.connectivity().watch();
        let task = tokio::spawn(run(service, online, interval, health_url, shutdown_rx));
        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the scheduler, letting a pass in progress finish first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

async fn run<R: RemoteStore>(
    service: Arc<DataService<R>>,
    mut online: watch::Receiver<bool>,
    interval: Duration,
    health_url: Option<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    if *online.borrow_and_update() {
        pass(&service, "startup").await;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                if *online.borrow_and_update() {
                    pass(&service, "reconnected").await;
                }
            }
            _ = ticker.tick() => {
                let was_online = service.connectivity().is_online();
                if let Some(url) = &health_url {
                    service.connectivity().check_health(url).await;
                }
                // A health check that brings us online is handled by the watch arm.
                if was_online && service.connectivity().is_online() {
                    pass(&service, "interval").await;
                }
            }
        }
    }
    tracing::debug!("Auto-sync stopped");
}

async fn pass<R: RemoteStore>(service: &DataService<R>, trigger: &str) {
    match service.sync().await {
        Ok(report) => tracing::debug!("Auto-sync ({}): {}", trigger, report),
        Err(e) => tracing::warn!("Auto-sync ({}) failed: {}", trigger, e),
    }
}
