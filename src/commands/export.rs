use std::path::PathBuf;

use babytrack::sync::HttpDataService;
use babytrack_core::export::{self, DateRange};
use chrono::{Duration, NaiveDate};
use clap::Args;

use super::{parse_date, resolve_baby, start_of_day};

/// Export a baby's entries as CSV
#[derive(Args)]
pub struct ExportCommand {
    /// Baby ID (UUID) or name; defaults to the active baby
    #[arg(long)]
    baby: Option<String>,

    /// First day to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    to: Option<NaiveDate>,

    /// Output file, or '-' for stdout; defaults to baby-metrics-<id>.csv
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl ExportCommand {
    pub async fn run(&self, service: &HttpDataService) -> Result<(), Box<dyn std::error::Error>> {
        let baby = resolve_baby(service, self.baby.as_deref()).await?;

        let from = self.from.and_then(start_of_day);
        // Inclusive of the whole last day.
        let to = self
            .to
            .and_then(|d| d.succ_opt())
            .and_then(start_of_day)
            .map(|ts| ts - Duration::milliseconds(1));
        if let (Some(from), Some(to)) = (from, to) {
            if to < from {
                return Err("--to must not be before --from".into());
            }
        }

        let csv = service.export_csv(baby.id, &DateRange::new(from, to)).await?;

        let path = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(export::file_name(baby.id)));
        if path.as_os_str() == "-" {
            print!("{}", csv);
            return Ok(());
        }

        std::fs::write(&path, csv)?;
        println!("Exported {}'s entries to {}", baby.name, path.display());
        Ok(())
    }
}
