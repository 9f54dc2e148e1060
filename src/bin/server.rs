//! Babytrack Server
//!
//! Reference backend for Babytrack clients: REST/JSON storage of babies and
//! entries with per-caregiver access, plus a WebSocket change feed.
//!
//! # Configuration
//!
//! Environment variables:
//! - `BABYTRACK_PORT`: Port to listen on (default: 8080)
//! - `BABYTRACK_SERVER_DB`: Path to the SQLite database (default: ~/.local/share/babytrack-server/babytrack.db)
//! - `BABYTRACK_SERVER_CONFIG`: Path to config file (default: ~/.config/babytrack-server/config.yaml)
//! - `BABYTRACK_PRESENCE_TIMEOUT`: Seconds without a heartbeat before a caregiver counts as offline (default: 90)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "parent-1"
//!     email: "parent@example.com"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /me`: Returns current user info (auth required)
//! - `/babies`, `/entries`: record CRUD (auth required)
//! - `GET /realtime/{baby_id}?key=`: WebSocket change feed

use babytrack::server::{router, ApiKeyStore, RealtimeHub, ServerState, ServerStorage};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    port: u16,
    db_path: PathBuf,
    config_path: PathBuf,
    presence_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("BABYTRACK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("BABYTRACK_SERVER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("babytrack-server")
                    .join("babytrack.db")
            });

        let config_path = std::env::var("BABYTRACK_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("babytrack-server")
                    .join("config.yaml")
            });

        let presence_timeout = std::env::var("BABYTRACK_PRESENCE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(90));

        Self {
            port,
            db_path,
            config_path,
            presence_timeout,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babytrack=info,babytrack_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!("Failed to create data directory: {}", e);
            std::process::exit(1);
        }
    }

    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let storage = match ServerStorage::open(&config.db_path).await {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let state = ServerState {
        storage: Arc::new(storage),
        hub: Arc::new(RealtimeHub::new(config.presence_timeout)),
        api_keys: Arc::new(ApiKeyStore::load(&config.config_path)),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
