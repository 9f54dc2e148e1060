//! Derived daily statistics and the feeding-gap alert.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Baby, Entry, EntryPayload, EntryType};

/// No feed for this many minutes during waking hours raises an alert.
pub const FEEDING_GAP_MINUTES: i64 = 180;

/// Local hours (inclusive) during which feeding gaps are monitored.
pub const WAKING_HOURS: std::ops::RangeInclusive<u32> = 6..=22;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_feeds: usize,
    pub total_diapers: usize,
    pub total_sleeps: usize,
    pub total_sleep_minutes: u32,
    pub last_feed: Option<DateTime<Utc>>,
    pub last_diaper: Option<DateTime<Utc>>,
    pub last_sleep: Option<DateTime<Utc>>,
}

impl DailyStats {
    /// Computes stats over the entries whose event time falls on `date` in
    /// the given time zone.
    pub fn compute<Tz: TimeZone>(entries: &[Entry], date: NaiveDate, tz: &Tz) -> Self {
        let mut stats = DailyStats {
            date,
            total_feeds: 0,
            total_diapers: 0,
            total_sleeps: 0,
            total_sleep_minutes: 0,
            last_feed: None,
            last_diaper: None,
            last_sleep: None,
        };

        for entry in entries_for_date(entries, date, tz) {
            let ts = entry.timestamp;
            match &entry.payload {
                EntryPayload::Feed(_) => {
                    stats.total_feeds += 1;
                    stats.last_feed = stats.last_feed.max(Some(ts));
                }
                EntryPayload::Diaper(_) => {
                    stats.total_diapers += 1;
                    stats.last_diaper = stats.last_diaper.max(Some(ts));
                }
                EntryPayload::Sleep(sleep) => {
                    stats.total_sleeps += 1;
                    stats.total_sleep_minutes += sleep.minutes();
                    stats.last_sleep = stats.last_sleep.max(Some(ts));
                }
            }
        }

        stats
    }
}

pub fn entries_by_type(entries: &[Entry], entry_type: EntryType) -> Vec<&Entry> {
    entries
        .iter()
        .filter(|e| e.entry_type() == entry_type)
        .collect()
}

/// Most recent entry by event time, optionally of one type.
pub fn last_entry(entries: &[Entry], entry_type: Option<EntryType>) -> Option<&Entry> {
    entries
        .iter()
        .filter(|e| entry_type.map_or(true, |t| e.entry_type() == t))
        .max_by_key(|e| e.timestamp)
}

pub fn entries_for_date<'a, Tz: TimeZone>(
    entries: &'a [Entry],
    date: NaiveDate,
    tz: &Tz,
) -> Vec<&'a Entry> {
    entries
        .iter()
        .filter(|e| e.timestamp.with_timezone(tz).date_naive() == date)
        .collect()
}

/// A baby that has gone without a feed for longer than [`FEEDING_GAP_MINUTES`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedingGapAlert {
    pub baby_id: Uuid,
    pub baby_name: String,
    pub last_feed: Option<DateTime<Utc>>,
}

impl FeedingGapAlert {
    pub fn message(&self) -> String {
        format!("{} hasn't been fed in over 3 hours", self.baby_name)
    }
}

/// Checks for a feeding gap at `now`. Outside waking hours nothing is
/// reported.
pub fn feeding_gap<Tz: TimeZone>(
    baby: &Baby,
    entries: &[Entry],
    now: &DateTime<Tz>,
) -> Option<FeedingGapAlert> {
    if !WAKING_HOURS.contains(&now.hour()) {
        return None;
    }

    let now_utc = now.with_timezone(&Utc);
    let last_feed = entries
        .iter()
        .filter(|e| e.baby_id == baby.id && e.entry_type() == EntryType::Feed)
        .map(|e| e.timestamp)
        .filter(|ts| *ts <= now_utc)
        .max();

    match last_feed {
        Some(ts) if now_utc - ts <= Duration::minutes(FEEDING_GAP_MINUTES) => None,
        _ => Some(FeedingGapAlert {
            baby_id: baby.id,
            baby_name: baby.name.clone(),
            last_feed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DiaperPayload, DiaperType, FeedPayload, FeedSource, NewBaby, NewEntry, SleepPayload,
        VolumeUnit,
    };
    use chrono::FixedOffset;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn entry(baby_id: Uuid, ts: DateTime<Utc>, payload: EntryPayload) -> Entry {
        Entry::from_new(NewEntry::new(baby_id, payload).at(ts), Uuid::new_v4(), ts, None)
    }

    fn feed() -> EntryPayload {
        EntryPayload::Feed(FeedPayload::new(FeedSource::Breast, VolumeUnit::Ml).with_duration(10))
    }

    fn baby() -> Baby {
        Baby::from_new(
            NewBaby::new("Ada", NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()),
            Uuid::new_v4(),
            at(0, 0),
        )
    }

    #[test]
    fn test_daily_stats() {
        let id = Uuid::new_v4();
        let nap = SleepPayload::started(at(13, 0), true)
            .finish(at(14, 30))
            .unwrap();
        let entries = vec![
            entry(id, at(7, 0), feed()),
            entry(id, at(10, 0), feed()),
            entry(id, at(9, 0), EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet))),
            entry(id, at(13, 0), EntryPayload::Sleep(nap)),
            entry(id, at(20, 0), EntryPayload::Sleep(SleepPayload::started(at(20, 0), false))),
        ];

        let stats = DailyStats::compute(&entries, at(0, 0).date_naive(), &Utc);
        assert_eq!(stats.total_feeds, 2);
        assert_eq!(stats.total_diapers, 1);
        assert_eq!(stats.total_sleeps, 2);
        assert_eq!(stats.total_sleep_minutes, 90);
        assert_eq!(stats.last_feed, Some(at(10, 0)));
        assert_eq!(stats.last_sleep, Some(at(20, 0)));
    }

    #[test]
    fn test_entries_for_date_uses_time_zone() {
        let id = Uuid::new_v4();
        let entries = vec![entry(id, at(23, 30), feed())];
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();

        let jan_1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan_2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(entries_for_date(&entries, jan_1, &Utc).len(), 1);
        assert!(entries_for_date(&entries, jan_1, &plus_two).is_empty());
        assert_eq!(entries_for_date(&entries, jan_2, &plus_two).len(), 1);
    }

    #[test]
    fn test_last_entry() {
        let id = Uuid::new_v4();
        let entries = vec![
            entry(id, at(7, 0), feed()),
            entry(id, at(9, 0), EntryPayload::Diaper(DiaperPayload::new(DiaperType::Dry))),
        ];
        assert_eq!(last_entry(&entries, None).unwrap().timestamp, at(9, 0));
        assert_eq!(
            last_entry(&entries, Some(EntryType::Feed)).unwrap().timestamp,
            at(7, 0)
        );
        assert!(last_entry(&entries, Some(EntryType::Sleep)).is_none());
        assert_eq!(entries_by_type(&entries, EntryType::Diaper).len(), 1);
    }

    #[test]
    fn test_feeding_gap() {
        let baby = baby();
        let entries = vec![entry(baby.id, at(8, 0), feed())];

        assert!(feeding_gap(&baby, &entries, &at(10, 59)).is_none());

        let alert = feeding_gap(&baby, &entries, &at(11, 30)).unwrap();
        assert_eq!(alert.last_feed, Some(at(8, 0)));
        assert_eq!(alert.message(), "Ada hasn't been fed in over 3 hours");
    }

    #[test]
    fn test_feeding_gap_quiet_at_night() {
        let baby = baby();
        assert!(feeding_gap(&baby, &[], &at(3, 0)).is_none());
        assert!(feeding_gap(&baby, &[], &at(23, 0)).is_none());
        assert!(feeding_gap(&baby, &[], &at(22, 0)).is_some());
    }
}
