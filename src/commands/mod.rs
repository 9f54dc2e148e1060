mod baby;
mod config_cmd;
mod entry;
mod export;
mod log;
mod sync_cmd;
mod today;
mod watch;

pub use baby::BabyCommand;
pub use config_cmd::ConfigCommand;
pub use entry::EntryCommand;
pub use export::ExportCommand;
pub use log::LogCommand;
pub use sync_cmd::SyncCommand;
pub use today::TodayCommand;
pub use watch::WatchCommand;

use std::io::{self, Write};

use babytrack::sync::HttpDataService;
use babytrack_core::Baby;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::ValueEnum;
use uuid::Uuid;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Finds a baby by id or case-insensitive name. Without an identifier the
/// active baby is used.
pub async fn resolve_baby(
    service: &HttpDataService,
    identifier: Option<&str>,
) -> Result<Baby, Box<dyn std::error::Error>> {
    let Some(identifier) = identifier else {
        let Some(id) = service.local().active_baby().await? else {
            return Err(
                "No active baby. Pick one with `babytrack baby use <name>` or pass --baby.".into(),
            );
        };
        return Ok(service.get_baby(id).await?);
    };

    if let Ok(id) = Uuid::parse_str(identifier) {
        return Ok(service.get_baby(id).await?);
    }

    service
        .get_babies()
        .await?
        .into_iter()
        .find(|b| b.name.eq_ignore_ascii_case(identifier))
        .ok_or_else(|| format!("Baby not found: {}", identifier).into())
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD.", value))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM` or `HH:MM` (today), in local time
/// unless an offset is given.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .ok()
        .or_else(|| {
            NaiveTime::parse_from_str(value, "%H:%M")
                .ok()
                .map(|t| Local::now().date_naive().and_time(t))
        })
        .ok_or_else(|| {
            format!(
                "Invalid time '{}'. Use HH:MM, 'YYYY-MM-DD HH:MM' or RFC 3339.",
                value
            )
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| format!("Time '{}' does not exist in the local time zone", value))
}

/// Start of `date` in local time.
pub fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
