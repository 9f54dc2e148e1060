use babytrack::sync::HttpDataService;
use babytrack_core::{timefmt, EntryQuery, EntryType, EntryUpdate};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{confirm, format_time, parse_time, resolve_baby, OutputFormat};

#[derive(Args)]
pub struct EntryCommand {
    #[command(subcommand)]
    pub command: EntrySubcommand,
}

#[derive(Subcommand)]
pub enum EntrySubcommand {
    /// List entries, newest first
    List {
        /// Baby ID (UUID) or name; defaults to the active baby
        #[arg(long)]
        baby: Option<String>,

        /// Only entries of this type (feed, diaper or sleep)
        #[arg(long = "type")]
        entry_type: Option<EntryType>,

        /// Entries at or after this time
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// Entries before this time
        #[arg(long, value_parser = parse_time)]
        to: Option<DateTime<Utc>>,

        /// Maximum number of entries
        #[arg(long, short = 'n', default_value = "20")]
        limit: u32,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an entry's details
    Show {
        /// Entry ID
        id: Uuid,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change an entry's time or notes
    Update {
        /// Entry ID
        id: Uuid,

        /// New event time
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,

        /// New notes
        #[arg(long, conflicts_with = "clear_notes")]
        notes: Option<String>,

        /// Remove the notes
        #[arg(long)]
        clear_notes: bool,
    },

    /// Delete an entry
    Delete {
        /// Entry ID
        id: Uuid,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// End a sleep in progress
    EndSleep {
        /// Sleep entry ID; defaults to the active baby's sleep in progress
        id: Option<Uuid>,

        /// Baby ID (UUID) or name; defaults to the active baby
        #[arg(long)]
        baby: Option<String>,

        /// When the sleep ended; defaults to now
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },
}

impl EntryCommand {
    pub async fn run(&self, service: &HttpDataService) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            EntrySubcommand::List {
                baby,
                entry_type,
                from,
                to,
                limit,
                format,
            } => {
                let baby = resolve_baby(service, baby.as_deref()).await?;
                let query = EntryQuery {
                    entry_type: *entry_type,
                    from: *from,
                    to: *to,
                    limit: Some(*limit),
                };
                let entries = service.get_entries(baby.id, &query).await?;

                if entries.is_empty() {
                    println!("No entries found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<16}  {:<6}  DETAILS", "ID", "TIME", "TYPE");
                        println!("{}", "-".repeat(90));
                        for entry in &entries {
                            println!(
                                "{:<36}  {:<16}  {:<6}  {}",
                                entry.id,
                                format_time(&entry.timestamp),
                                entry.entry_type(),
                                entry.payload.summary()
                            );
                        }
                        println!("\nTotal: {} entry(ies) for {}", entries.len(), baby.name);
                    }
                }
                Ok(())
            }

            EntrySubcommand::Show { id, format } => {
                let entry = service.get_entry(*id).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entry)?);
                    }
                    OutputFormat::Text => {
                        println!("{} entry {}", entry.entry_type(), entry.id);
                        println!("  Time:    {}", format_time(&entry.timestamp));
                        println!("  Details: {}", entry.payload.summary());
                        if let Some(notes) = &entry.notes {
                            println!("  Notes:   {}", notes);
                        }
                        if let Some(by) = &entry.created_by {
                            println!("  Logged by: {}", by);
                        }
                        println!("  Updated: {}", format_time(&entry.updated_at));
                    }
                }
                Ok(())
            }

            EntrySubcommand::Update {
                id,
                at,
                notes,
                clear_notes,
            } => {
                let update = EntryUpdate {
                    timestamp: *at,
                    notes: if *clear_notes {
                        Some(None)
                    } else {
                        notes.clone().map(Some)
                    },
                    payload: None,
                };
                if update.is_empty() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let updated = service.update_entry(*id, update).await?;
                println!(
                    "Updated {} entry at {}",
                    updated.entry_type(),
                    format_time(&updated.timestamp)
                );
                Ok(())
            }

            EntrySubcommand::Delete { id, force } => {
                let entry = service.get_entry(*id).await?;

                if !force
                    && !confirm(&format!(
                        "Delete {} entry from {}?",
                        entry.entry_type(),
                        format_time(&entry.timestamp)
                    ))?
                {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                service.delete_entry(entry.id).await?;
                println!("Deleted entry {}", entry.id);
                Ok(())
            }

            EntrySubcommand::EndSleep { id, baby, at } => {
                let id = match id {
                    Some(id) => *id,
                    None => {
                        let baby = resolve_baby(service, baby.as_deref()).await?;
                        match service.active_sleep(baby.id).await? {
                            Some(sleep) => sleep.id,
                            None => {
                                return Err(format!("{} has no sleep in progress", baby.name).into())
                            }
                        }
                    }
                };

                let end = at.unwrap_or_else(timefmt::now);
                let entry = service.end_sleep(id, end).await?;
                println!("Sleep ended: {}", entry.payload.summary());
                Ok(())
            }
        }
    }
}
