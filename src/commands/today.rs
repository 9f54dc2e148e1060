use babytrack::sync::HttpDataService;
use babytrack_core::stats::{self, DailyStats};
use babytrack_core::EntryQuery;
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use serde::Serialize;

use super::{format_time, parse_date, resolve_baby, start_of_day, OutputFormat};

/// Show a day's summary and feeding alert
#[derive(Args)]
pub struct TodayCommand {
    /// Baby ID (UUID) or name; defaults to the active baby
    #[arg(long)]
    baby: Option<String>,

    /// Day to summarize (YYYY-MM-DD); defaults to today
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct Summary<'a> {
    baby: &'a str,
    stats: &'a DailyStats,
    alert: Option<String>,
}

impl TodayCommand {
    pub async fn run(&self, service: &HttpDataService) -> Result<(), Box<dyn std::error::Error>> {
        let baby = resolve_baby(service, self.baby.as_deref()).await?;
        let today = Local::now().date_naive();
        let date = self.date.unwrap_or(today);

        // The previous day is included so the last feed before midnight
        // still counts for the gap check.
        let from = date
            .pred_opt()
            .and_then(start_of_day)
            .ok_or("Date out of range")?;
        let to = date
            .succ_opt()
            .and_then(start_of_day)
            .ok_or("Date out of range")?;
        let entries = service
            .get_entries(baby.id, &EntryQuery::default().between(from, to).with_limit(500))
            .await?;

        let daily = DailyStats::compute(&entries, date, &Local);
        let alert = if date == today {
            stats::feeding_gap(&baby, &entries, &Local::now())
        } else {
            None
        };

        match self.format {
            OutputFormat::Json => {
                let summary = Summary {
                    baby: &baby.name,
                    stats: &daily,
                    alert: alert.as_ref().map(|a| a.message()),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text => {
                println!("{} on {}", baby.name, date);
                println!("{}", "=".repeat(baby.name.len() + 14));
                println!();
                println!("Feeds:   {}", daily.total_feeds);
                println!("Diapers: {}", daily.total_diapers);
                println!(
                    "Sleep:   {} ({}h {:02}m)",
                    daily.total_sleeps,
                    daily.total_sleep_minutes / 60,
                    daily.total_sleep_minutes % 60
                );
                println!();
                print_last("Last feed", daily.last_feed.as_ref());
                print_last("Last diaper", daily.last_diaper.as_ref());
                print_last("Last sleep", daily.last_sleep.as_ref());

                if let Some(sleep) = entries.iter().find(|e| e.is_active_sleep()) {
                    let minutes = (chrono::Utc::now() - sleep.timestamp).num_minutes();
                    println!();
                    println!(
                        "Sleeping since {} ({} min)",
                        format_time(&sleep.timestamp),
                        minutes.max(0)
                    );
                }

                if let Some(alert) = alert {
                    println!();
                    println!("! {}", alert.message());
                    if let Some(last) = alert.last_feed {
                        let gap = chrono::Utc::now() - last;
                        println!(
                            "  Last feed {}h {:02}m ago",
                            gap.num_hours(),
                            (gap - Duration::hours(gap.num_hours())).num_minutes()
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn print_last(label: &str, ts: Option<&chrono::DateTime<chrono::Utc>>) {
    match ts {
        Some(ts) => println!("{:<12} {}", format!("{}:", label), format_time(ts)),
        None => println!("{:<12} -", format!("{}:", label)),
    }
}
