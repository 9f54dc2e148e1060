use babytrack_core::{Caregiver, FeedSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Signed-in caregiver. Both fields are needed for remote access.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub user_id: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl AuthConfig {
    pub fn caregiver(&self) -> Option<Caregiver> {
        match (&self.user_id, &self.token) {
            (Some(id), Some(token)) => Some(Caregiver::new(id.clone(), token.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user_id", &self.user_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// Run a sync pass after writes and when connectivity returns
    pub auto_sync: bool,
    /// Seconds between background sync passes
    pub interval_secs: u64,
    /// Seconds a single record may take during a sync pass
    pub record_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auto_sync: false,
            interval_secs: 300,
            record_timeout_secs: 15,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs.max(1))
    }
}

/// Change feed tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub heartbeat_secs: u64,
    pub presence_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            presence_timeout_secs: 90,
            channel_capacity: 64,
        }
    }
}

impl RealtimeConfig {
    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            presence_timeout: Duration::from_secs(self.presence_timeout_secs.max(1)),
            channel_capacity: self.channel_capacity.max(1),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub realtime: RealtimeConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    auth: Option<AuthConfig>,
    sync: Option<SyncConfig>,
    realtime: Option<RealtimeConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path =
            ConfigValue::new(default_database_path(), ConfigSource::Default);
        let mut config_file = None;
        let mut auth = AuthConfig::default();
        let mut sync = SyncConfig::default();
        let mut realtime = RealtimeConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(file_auth) = file_config.auth {
                auth = file_auth;
            }
            if let Some(file_sync) = file_config.sync {
                sync = file_sync;
            }
            if let Some(file_realtime) = file_config.realtime {
                realtime = file_realtime;
            }
        }

        if let Ok(db_path) = std::env::var("BABYTRACK_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(user_id) = std::env::var("BABYTRACK_USER_ID") {
            auth.user_id = Some(user_id);
        }
        if let Ok(token) = std::env::var("BABYTRACK_TOKEN") {
            auth.token = Some(token);
        }
        if let Ok(url) = std::env::var("BABYTRACK_SERVER_URL") {
            sync.server_url = Some(url);
        }

        Ok(Self {
            database_path,
            config_file,
            auth,
            sync,
            realtime,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/babytrack/
    /// - macOS: ~/Library/Application Support/babytrack/
    /// - Windows: %APPDATA%/babytrack/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("babytrack")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/babytrack/
    /// - macOS: ~/Library/Application Support/babytrack/
    /// - Windows: %APPDATA%/babytrack/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("babytrack")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// The signed-in caregiver, if credentials are configured.
    pub fn caregiver(&self) -> Option<Caregiver> {
        self.auth.caregiver()
    }

    /// True when both a server and credentials are configured.
    pub fn is_sync_configured(&self) -> bool {
        self.sync.server_url.is_some() && self.caregiver().is_some()
    }
}

pub fn default_database_path() -> PathBuf {
    Config::default_data_dir().join("babytrack.db")
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
