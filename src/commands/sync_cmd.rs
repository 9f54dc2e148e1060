//! Sync CLI commands for pushing local records to the server.

use babytrack::config::Config;
use babytrack::sync::{HttpDataService, SyncError};
use babytrack_core::check_server;
use clap::{Args, Subcommand};

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        service: &HttpDataService,
        config: &Config,
    ) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(service, config).await,
            Some(SyncSubcommand::Status) => self.status(service, config).await,
        }
    }

    async fn sync(&self, service: &HttpDataService, config: &Config) -> Result<(), SyncCommandError> {
        if !config.is_sync_configured() {
            return Err(SyncCommandError::NotConfigured);
        }
        if !service.connectivity().is_online() {
            return Err(SyncCommandError::Unreachable(
                service.remote().server_url().to_string(),
            ));
        }

        println!("Syncing with server...");
        println!();

        let report = service.sync().await?;

        println!("  ✓ {} baby(ies) pushed", report.babies_pushed);
        println!("  ✓ {} entry(ies) pushed", report.entries_pushed);
        if report.deletions_pushed > 0 {
            println!("  ✓ {} deletion(s) pushed", report.deletions_pushed);
        }
        if report.removed_locally > 0 {
            println!(
                "  ✓ {} record(s) removed elsewhere dropped locally",
                report.removed_locally
            );
        }
        for failure in &report.failures {
            println!("  ✗ {} {}: {}", failure.kind, failure.id, failure.message);
        }

        println!();
        report.into_result()?;
        println!("Sync complete.");
        Ok(())
    }

    async fn status(
        &self,
        service: &HttpDataService,
        config: &Config,
    ) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let (Some(server_url), Some(who)) = (&config.sync.server_url, config.caregiver()) else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  auth:");
            println!("    user_id: \"your-user-id\"");
            println!("    token: \"your-api-key\"");
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  BABYTRACK_SERVER_URL");
            println!("  BABYTRACK_USER_ID");
            println!("  BABYTRACK_TOKEN");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!("User:      {}", who.id);
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        print!("Server status: ");
        if !check_server(server_url).await {
            println!("✗ unreachable");
            return Ok(());
        }
        match service.remote().me(&who).await {
            Ok(me) => println!("✓ connected as {}", me.user_id),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    Unreachable(String),
    SyncError(SyncError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => write!(
                f,
                "Sync is not configured. Run `babytrack sync status` for setup help."
            ),
            SyncCommandError::Unreachable(url) => write!(f, "Server unreachable: {}", url),
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::SyncError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}
