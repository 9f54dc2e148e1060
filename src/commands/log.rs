use babytrack::sync::HttpDataService;
use babytrack_core::models::{
    BreastSide, Consistency, DiaperColor, DiaperPayload, DiaperType, FeedPayload, FeedSource,
    FormulaType, SleepPayload, SleepQuality, VolumeUnit,
};
use babytrack_core::{timefmt, Entry, EntryPayload, NewEntry, Units};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use super::{format_time, parse_time, resolve_baby};

#[derive(Args)]
pub struct LogCommand {
    /// Baby ID (UUID) or name; defaults to the active baby
    #[arg(long, global = true)]
    baby: Option<String>,

    /// When it happened (HH:MM, 'YYYY-MM-DD HH:MM' or RFC 3339); defaults to now
    #[arg(long, global = true, value_parser = parse_time)]
    at: Option<DateTime<Utc>>,

    /// Free-form notes
    #[arg(long, global = true)]
    notes: Option<String>,

    #[command(subcommand)]
    pub command: LogSubcommand,
}

#[derive(Subcommand)]
pub enum LogSubcommand {
    /// Log a feed
    Feed {
        /// breast, bottle or solid
        source: FeedSource,

        /// Amount taken
        #[arg(long)]
        volume: Option<f64>,

        /// Volume unit (ml or oz); defaults from the baby's preferred units
        #[arg(long)]
        unit: Option<VolumeUnit>,

        /// Minutes spent feeding
        #[arg(long)]
        duration: Option<u32>,

        /// left, right or both
        #[arg(long)]
        side: Option<BreastSide>,

        /// formula, breast_milk or mixed
        #[arg(long)]
        formula_type: Option<FormulaType>,
    },

    /// Log a diaper change
    Diaper {
        /// wet, dirty, mixed or dry
        diaper_type: DiaperType,

        #[arg(long)]
        color: Option<DiaperColor>,

        #[arg(long)]
        consistency: Option<Consistency>,
    },

    /// Start a sleep; end it with `babytrack entry end-sleep`
    Sleep {
        /// Mark as a nap rather than night sleep
        #[arg(long)]
        nap: bool,

        /// Quality from 1 to 5
        #[arg(long, value_parser = parse_quality)]
        quality: Option<SleepQuality>,

        /// Where the baby is sleeping
        #[arg(long)]
        location: Option<String>,

        /// Log an already finished sleep ending at this time
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
    },
}

fn parse_quality(value: &str) -> Result<SleepQuality, String> {
    let n: u8 = value
        .parse()
        .map_err(|_| format!("Invalid quality '{}'", value))?;
    SleepQuality::try_from(n).map_err(|e| e.to_string())
}

impl LogCommand {
    pub async fn run(&self, service: &HttpDataService) -> Result<(), Box<dyn std::error::Error>> {
        let baby = resolve_baby(service, self.baby.as_deref()).await?;
        let at = self.at.unwrap_or_else(timefmt::now);

        let payload = match &self.command {
            LogSubcommand::Feed {
                source,
                volume,
                unit,
                duration,
                side,
                formula_type,
            } => {
                let unit = unit.unwrap_or(match baby.preferred_units {
                    Units::Metric => VolumeUnit::Ml,
                    Units::Imperial => VolumeUnit::Oz,
                });
                let mut feed = FeedPayload::new(*source, unit);
                if let Some(volume) = volume {
                    if *volume <= 0.0 {
                        return Err("Volume must be a positive number".into());
                    }
                    feed = feed.with_volume(*volume);
                }
                if let Some(duration) = duration {
                    feed = feed.with_duration(*duration);
                }
                if let Some(side) = side {
                    feed = feed.with_side(*side);
                }
                if let Some(formula_type) = formula_type {
                    feed = feed.with_formula_type(*formula_type);
                }
                EntryPayload::Feed(feed)
            }

            LogSubcommand::Diaper {
                diaper_type,
                color,
                consistency,
            } => {
                let mut diaper = DiaperPayload::new(*diaper_type);
                if let Some(color) = color {
                    diaper = diaper.with_color(*color);
                }
                if let Some(consistency) = consistency {
                    diaper = diaper.with_consistency(*consistency);
                }
                EntryPayload::Diaper(diaper)
            }

            LogSubcommand::Sleep {
                nap,
                quality,
                location,
                until,
            } => {
                let mut sleep = SleepPayload::started(at, *nap);
                if let Some(quality) = quality {
                    sleep = sleep.with_quality(*quality);
                }
                if let Some(location) = location {
                    sleep = sleep.with_location(location);
                }
                match until {
                    Some(end) => sleep = sleep.finish(*end)?,
                    None => {
                        if let Some(active) = service.active_sleep(baby.id).await? {
                            eprintln!(
                                "Warning: {} already has a sleep in progress since {}",
                                baby.name,
                                format_time(&active.timestamp)
                            );
                        }
                    }
                }
                EntryPayload::Sleep(sleep)
            }
        };

        let mut new = NewEntry::new(baby.id, payload).at(at);
        if let Some(notes) = &self.notes {
            new = new.with_notes(notes);
        }

        let entry = service.create_entry(new).await?;
        print_logged(&baby.name, &entry);
        Ok(())
    }
}

fn print_logged(baby_name: &str, entry: &Entry) {
    println!(
        "Logged {} for {} at {}: {}",
        entry.entry_type(),
        baby_name,
        format_time(&entry.timestamp),
        entry.payload.summary()
    );
    println!("  ID: {}", entry.id);
}
