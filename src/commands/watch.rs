use std::sync::Arc;
use std::time::Duration;

use babytrack::config::Config;
use babytrack::state::AppContext;
use babytrack::sync::{AutoSync, HttpDataService};
use babytrack_core::feed::WsTransport;
use babytrack_core::{ChangeFeed, FeedEvent, HttpRemoteStore};
use chrono::Local;
use clap::Args;

use super::{format_time, resolve_baby};

/// Delay between attempts to reopen a dropped feed.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type Context = AppContext<HttpRemoteStore, WsTransport>;

/// Follow live updates from other caregivers
#[derive(Args)]
pub struct WatchCommand {
    /// Baby ID (UUID) or name; defaults to the active baby
    #[arg(long)]
    baby: Option<String>,
}

impl WatchCommand {
    pub async fn run(
        &self,
        service: Arc<HttpDataService>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let Some(server_url) = config.sync.server_url.clone() else {
            return Err("Watching needs sync.server_url and credentials in the config".into());
        };
        if config.caregiver().is_none() {
            return Err("Watching needs auth.user_id and auth.token in the config".into());
        }

        let baby = resolve_baby(&service, self.baby.as_deref()).await?;

        let feed = ChangeFeed::with_settings(
            WsTransport::new(server_url.clone()),
            config.realtime.feed_settings(),
        );
        let ctx = AppContext::new(service.clone(), feed);
        ctx.initialize().await?;
        ctx.select_baby(baby.id).await?;

        let auto_sync = AutoSync::spawn(service.clone(), config.sync.interval(), Some(server_url));

        print_summary(&ctx);
        println!();
        println!("Watching {} (Ctrl-C to stop)", baby.name);

        let result = watch_loop(&ctx).await;

        auto_sync.stop().await;
        ctx.teardown().await;
        result
    }
}

async fn watch_loop(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let mut online = ctx.service().connectivity().watch();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopped watching");
                return Ok(());
            }
            changed = online.changed() => {
                if changed.is_err() {
                    continue;
                }
                let now_online = *online.borrow_and_update();
                if now_online {
                    println!("{} back online", stamp());
                    reconnect(ctx).await;
                } else {
                    println!("{} offline, changes are kept locally", stamp());
                }
            }
            event = ctx.next_event() => {
                let Some(event) = event else {
                    return Err("Change feed closed".into());
                };
                let disconnected = matches!(event, FeedEvent::Disconnected { .. });
                describe(&event);
                ctx.handle_change(event).await?;
                if disconnected {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    reconnect(ctx).await;
                }
            }
        }
    }
}

async fn reconnect(ctx: &Context) {
    match ctx.resubscribe().await {
        Ok(true) => {
            println!("{} live updates resumed", stamp());
            print_summary(ctx);
        }
        Ok(false) => {}
        Err(e) => tracing::warn!("Resubscribe failed: {}", e),
    }
}

fn stamp() -> String {
    format!("[{}]", Local::now().format("%H:%M:%S"))
}

fn describe(event: &FeedEvent) {
    match event {
        FeedEvent::Change { kind, entry, .. } => {
            let by = entry.created_by.as_deref().unwrap_or("another caregiver");
            println!(
                "{} {} {} by {}: {} at {}",
                stamp(),
                entry.entry_type(),
                kind,
                by,
                entry.payload.summary(),
                format_time(&entry.timestamp)
            );
        }
        FeedEvent::Presence { online, .. } => {
            if online.is_empty() {
                println!("{} no other caregivers online", stamp());
            } else {
                let names: Vec<&str> = online.iter().map(|p| p.caregiver_id.as_str()).collect();
                println!("{} online: {}", stamp(), names.join(", "));
            }
        }
        FeedEvent::Disconnected { .. } => {
            println!("{} live updates lost, reconnecting", stamp());
        }
    }
}

fn print_summary(ctx: &Context) {
    let stats = ctx.today_stats();
    println!(
        "Today: {} feed(s), {} diaper(s), {} min sleep",
        stats.total_feeds, stats.total_diapers, stats.total_sleep_minutes
    );
    if let Some(alert) = ctx.feeding_alert(&Local::now()) {
        println!("! {}", alert.message());
    }
}
