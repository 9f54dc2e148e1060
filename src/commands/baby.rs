use babytrack::sync::HttpDataService;
use babytrack_core::{BabyUpdate, NewBaby, Units};
use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};

use super::{confirm, parse_date, resolve_baby, OutputFormat};

#[derive(Args)]
pub struct BabyCommand {
    #[command(subcommand)]
    pub command: BabySubcommand,
}

#[derive(Subcommand)]
pub enum BabySubcommand {
    /// Add a baby
    Add {
        /// Baby's name
        name: String,

        /// Birth date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        born: NaiveDate,

        /// Preferred units (metric or imperial)
        #[arg(long, default_value = "metric")]
        units: Units,

        /// Make this the active baby
        #[arg(long = "use")]
        make_active: bool,
    },

    /// List babies you care for
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a baby's details
    Show {
        /// Baby ID (UUID) or name; defaults to the active baby
        identifier: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update a baby
    Update {
        /// Baby ID (UUID) or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New birth date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        born: Option<NaiveDate>,

        /// Preferred units (metric or imperial)
        #[arg(long)]
        units: Option<Units>,
    },

    /// Delete a baby and all of its entries
    Delete {
        /// Baby ID (UUID) or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Set the active baby used by other commands
    Use {
        /// Baby ID (UUID) or name
        identifier: String,
    },
}

impl BabyCommand {
    pub async fn run(&self, service: &HttpDataService) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            BabySubcommand::Add {
                name,
                born,
                units,
                make_active,
            } => {
                if name.trim().is_empty() {
                    return Err("Baby name cannot be empty".into());
                }

                let baby = service
                    .create_baby(NewBaby::new(name.trim(), *born).with_units(*units))
                    .await?;

                let first = service.local().active_baby().await?.is_none();
                if *make_active || first {
                    service.local().set_active_baby(Some(baby.id)).await?;
                }

                println!("Added {} ({})", baby.name, baby.id);
                if *make_active || first {
                    println!("{} is now the active baby", baby.name);
                }
                Ok(())
            }

            BabySubcommand::List { format } => {
                let babies = service.get_babies().await?;

                if babies.is_empty() {
                    println!("No babies found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&babies)?);
                    }
                    OutputFormat::Text => {
                        let active = service.local().active_baby().await?;
                        println!("  {:<36}  {:<20}  {:<10}  UNITS", "ID", "NAME", "BORN");
                        println!("{}", "-".repeat(82));
                        for baby in &babies {
                            let marker = if Some(baby.id) == active { "*" } else { " " };
                            println!(
                                "{} {:<36}  {:<20}  {:<10}  {}",
                                marker, baby.id, baby.name, baby.birth_date, baby.preferred_units
                            );
                        }
                        println!("\nTotal: {} baby(ies)", babies.len());
                    }
                }
                Ok(())
            }

            BabySubcommand::Show { identifier, format } => {
                let baby = resolve_baby(service, identifier.as_deref()).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&baby)?);
                    }
                    OutputFormat::Text => {
                        let today = Local::now().date_naive();
                        println!("{}", baby.name);
                        println!("  ID:    {}", baby.id);
                        println!(
                            "  Born:  {} ({} days old)",
                            baby.birth_date,
                            baby.age_days(today)
                        );
                        println!("  Units: {}", baby.preferred_units);
                    }
                }
                Ok(())
            }

            BabySubcommand::Update {
                identifier,
                name,
                born,
                units,
            } => {
                let update = BabyUpdate {
                    name: name.as_ref().map(|n| n.trim().to_string()),
                    birth_date: *born,
                    preferred_units: *units,
                };
                if update.is_empty() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }
                if update.name.as_deref() == Some("") {
                    return Err("Baby name cannot be empty".into());
                }

                let baby = resolve_baby(service, Some(identifier)).await?;
                let updated = service.update_baby(baby.id, update).await?;
                println!("Updated {} ({})", updated.name, updated.id);
                Ok(())
            }

            BabySubcommand::Delete { identifier, force } => {
                let baby = resolve_baby(service, Some(identifier)).await?;

                if !force
                    && !confirm(&format!(
                        "Delete '{}' and all of their entries?",
                        baby.name
                    ))?
                {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                service.delete_baby(baby.id).await?;
                if service.local().active_baby().await? == Some(baby.id) {
                    service.local().set_active_baby(None).await?;
                }
                println!("Deleted {}", baby.name);
                Ok(())
            }

            BabySubcommand::Use { identifier } => {
                let baby = resolve_baby(service, Some(identifier)).await?;
                service.local().set_active_baby(Some(baby.id)).await?;
                println!("{} is now the active baby", baby.name);
                Ok(())
            }
        }
    }
}
