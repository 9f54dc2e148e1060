//! CSV export of a baby's entry history.
//!
//! One row per entry: the record creation time, the entry type and the raw
//! payload JSON. Rows are newest first.

use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Entry;
use crate::timefmt;

pub const CSV_HEADER: [&str; 3] = ["Date", "Type", "Details"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV output error: {0}")]
    Output(String),
}

/// Optional inclusive bounds on record creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(
        default,
        with = "timefmt::millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub from: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "timefmt::millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| *ts >= from) && self.to.map_or(true, |to| *ts <= to)
    }
}

/// Suggested download name for a baby's export.
pub fn file_name(baby_id: Uuid) -> String {
    format!("baby-metrics-{}.csv", baby_id)
}

/// Renders the entries within `range` as CSV.
pub fn entries_to_csv<'a, I>(entries: I, range: &DateRange) -> Result<String, ExportError>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let mut selected: Vec<&Entry> = entries
        .into_iter()
        .filter(|e| range.contains(&e.created_at))
        .collect();
    selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for entry in selected {
        writer.write_record([
            timefmt::encode(&entry.created_at),
            entry.entry_type().to_string(),
            entry.payload.to_json(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Output(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Output(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DiaperPayload, DiaperType, EntryPayload, FeedPayload, FeedSource, NewEntry, VolumeUnit,
    };
    use chrono::TimeZone;

    fn entry_at(created_at: DateTime<Utc>, payload: EntryPayload) -> Entry {
        Entry::from_new(
            NewEntry::new(Uuid::nil(), payload).at(created_at),
            Uuid::new_v4(),
            created_at,
            None,
        )
    }

    #[test]
    fn test_csv_newest_first_with_escaped_json() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let entries = vec![
            entry_at(
                t0,
                EntryPayload::Feed(FeedPayload::new(FeedSource::Bottle, VolumeUnit::Ml).with_volume(90.0)),
            ),
            entry_at(
                t0 + chrono::Duration::hours(1),
                EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
            ),
        ];

        let csv = entries_to_csv(&entries, &DateRange::all()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], r#""Date","Type","Details""#);
        assert_eq!(
            lines[1],
            r#""2024-01-01T09:00:00.000Z","diaper","{""diaperType"":""wet""}""#
        );
        assert!(lines[2].starts_with(r#""2024-01-01T08:00:00.000Z","feed""#));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_range_is_inclusive() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let entries: Vec<Entry> = (0..3)
            .map(|h| {
                entry_at(
                    t0 + chrono::Duration::hours(h),
                    EntryPayload::Diaper(DiaperPayload::new(DiaperType::Dry)),
                )
            })
            .collect();

        let range = DateRange::new(Some(t0), Some(t0 + chrono::Duration::hours(1)));
        let csv = entries_to_csv(&entries, &range).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name(Uuid::nil()),
            "baby-metrics-00000000-0000-0000-0000-000000000000.csv"
        );
    }
}
