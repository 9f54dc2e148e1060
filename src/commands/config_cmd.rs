use std::path::PathBuf;

use babytrack::config::Config;
use clap::{Args, Subcommand};

use super::OutputFormat;

const CONFIG_TEMPLATE: &str = r#"# Babytrack configuration
# database_path: /path/to/babytrack.db

# auth:
#   user_id: "parent-1"
#   token: "your-api-key"

sync:
  server_url: "http://localhost:8080"
  auto_sync: false
  interval_secs: 300
  record_timeout_secs: 15

realtime:
  heartbeat_secs: 30
  presence_timeout_secs: 90
  channel_capacity: 64
"#;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a starter config file
    Init {
        /// Where to write it; defaults to the platform config path
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!(
                            "auth.user_id: {}",
                            config.auth.user_id.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "auth.token: {}",
                            if config.auth.token.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!();

                        println!(
                            "sync.server_url: {}",
                            config.sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!("sync.auto_sync: {}", config.sync.auto_sync);
                        println!("sync.interval_secs: {}", config.sync.interval_secs);
                        println!(
                            "sync.record_timeout_secs: {}",
                            config.sync.record_timeout_secs
                        );
                        println!();

                        println!("realtime.heartbeat_secs: {}", config.realtime.heartbeat_secs);
                        println!(
                            "realtime.presence_timeout_secs: {}",
                            config.realtime.presence_timeout_secs
                        );
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init { path, force } => {
                let path = path.clone().unwrap_or_else(Config::default_config_path);
                if path.exists() && !force {
                    return Err(format!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    )
                    .into());
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, CONFIG_TEMPLATE)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_loads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG_TEMPLATE).unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(
            config.sync.server_url.as_deref(),
            Some("http://localhost:8080")
        );
        assert!(!config.sync.auto_sync);
        assert!(config.caregiver().is_none());
        assert_eq!(config.realtime.heartbeat_secs, 30);
    }
}
