use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use babytrack::config::Config;
use babytrack::sync::{open_service, try_auto_sync};
use commands::{
    BabyCommand, ConfigCommand, EntryCommand, ExportCommand, LogCommand, SyncCommand,
    TodayCommand, WatchCommand,
};

#[derive(Parser)]
#[command(name = "babytrack")]
#[command(version)]
#[command(about = "Track feeds, diapers and sleep, shared between caregivers", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage babies
    Baby(BabyCommand),

    /// Log a feed, diaper change or sleep
    Log(LogCommand),

    /// List and edit logged entries
    Entry(EntryCommand),

    /// Summary of a day with the feeding alert
    Today(TodayCommand),

    /// Export entries as CSV
    Export(ExportCommand),

    /// Push local changes to the server
    Sync(SyncCommand),

    /// Follow live updates from other caregivers
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babytrack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let service = open_service(&config).await?;

    match command {
        Commands::Baby(cmd) => {
            cmd.run(&service).await?;
            try_auto_sync(&config, &service).await;
        }
        Commands::Log(cmd) => {
            cmd.run(&service).await?;
            try_auto_sync(&config, &service).await;
        }
        Commands::Entry(cmd) => {
            cmd.run(&service).await?;
            try_auto_sync(&config, &service).await;
        }
        Commands::Today(cmd) => cmd.run(&service).await?,
        Commands::Export(cmd) => cmd.run(&service).await?,
        Commands::Sync(cmd) => cmd.run(&service, &config).await?,
        Commands::Watch(cmd) => cmd.run(Arc::new(service), &config).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
