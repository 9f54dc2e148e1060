use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::entry::EntryType;
use super::ModelError;
use crate::timefmt;

/// Declares a closed string vocabulary with `Display`/`FromStr` matching its
/// serde representation.
macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.to_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == lowered)
                    .ok_or_else(|| {
                        let options: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        format!(
                            "Invalid {} '{}'. Valid options: {}",
                            stringify!($name),
                            s,
                            options.join(", ")
                        )
                    })
            }
        }
    };
}

vocabulary!(FeedSource {
    Breast => "breast",
    Bottle => "bottle",
    Solid => "solid",
});

vocabulary!(VolumeUnit { Ml => "ml", Oz => "oz" });

vocabulary!(BreastSide {
    Left => "left",
    Right => "right",
    Both => "both",
});

vocabulary!(FormulaType {
    Formula => "formula",
    BreastMilk => "breast_milk",
    Mixed => "mixed",
});

vocabulary!(DiaperType {
    Wet => "wet",
    Dirty => "dirty",
    Mixed => "mixed",
    Dry => "dry",
});

vocabulary!(DiaperColor {
    Yellow => "yellow",
    Brown => "brown",
    Green => "green",
    Red => "red",
    Black => "black",
    Other => "other",
});

vocabulary!(Consistency {
    Liquid => "liquid",
    Soft => "soft",
    Formed => "formed",
    Hard => "hard",
});

/// Sleep quality from 1 (poor) to 5 (excellent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SleepQuality(u8);

impl SleepQuality {
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SleepQuality {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidQuality(value))
        }
    }
}

impl From<SleepQuality> for u8 {
    fn from(q: SleepQuality) -> Self {
        q.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeedPayload {
    pub source: FeedSource,
    pub unit: VolumeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Minutes, mostly for breastfeeding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<BreastSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_type: Option<FormulaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FeedPayload {
    pub fn new(source: FeedSource, unit: VolumeUnit) -> Self {
        Self {
            source,
            unit,
            volume: None,
            duration: None,
            side: None,
            formula_type: None,
            bottle_type: None,
            location: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration = Some(minutes);
        self
    }

    pub fn with_side(mut self, side: BreastSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_formula_type(mut self, formula_type: FormulaType) -> Self {
        self.formula_type = Some(formula_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiaperPayload {
    pub diaper_type: DiaperType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<DiaperColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<Consistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl DiaperPayload {
    pub fn new(diaper_type: DiaperType) -> Self {
        Self {
            diaper_type,
            color: None,
            consistency: None,
            size: None,
        }
    }

    pub fn with_color(mut self, color: DiaperColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SleepPayload {
    #[serde(with = "timefmt::millis")]
    pub start_time: DateTime<Utc>,
    /// Absent while the sleep is in progress.
    #[serde(
        default,
        with = "timefmt::millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<SleepQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub is_nap: bool,
}

impl SleepPayload {
    pub fn started(start_time: DateTime<Utc>, is_nap: bool) -> Self {
        Self {
            start_time: timefmt::truncate(start_time),
            end_time: None,
            duration: None,
            quality: None,
            location: None,
            is_nap,
        }
    }

    pub fn with_quality(mut self, quality: SleepQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn in_progress(&self) -> bool {
        self.end_time.is_none()
    }

    /// Ends the sleep and derives its duration in whole minutes.
    pub fn finish(mut self, end_time: DateTime<Utc>) -> Result<Self, ModelError> {
        let end_time = timefmt::truncate(end_time);
        if end_time < self.start_time {
            return Err(ModelError::SleepEndsBeforeStart);
        }
        self.duration = Some((end_time - self.start_time).num_minutes() as u32);
        self.end_time = Some(end_time);
        Ok(self)
    }

    /// Minutes slept: the recorded duration, else the span between start and
    /// end. In-progress sleeps count nothing.
    pub fn minutes(&self) -> u32 {
        match (self.duration, self.end_time) {
            (Some(d), _) => d,
            (None, Some(end)) => (end - self.start_time).num_minutes().max(0) as u32,
            (None, None) => 0,
        }
    }
}

/// Type-specific payload of an entry. The variant is the entry type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryPayload {
    Feed(FeedPayload),
    Diaper(DiaperPayload),
    Sleep(SleepPayload),
}

impl EntryPayload {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryPayload::Feed(_) => EntryType::Feed,
            EntryPayload::Diaper(_) => EntryType::Diaper,
            EntryPayload::Sleep(_) => EntryType::Sleep,
        }
    }

    /// Serializes the payload fields alone, without the type tag. This is the
    /// blob stored next to a separate `type` column.
    pub fn to_value(&self) -> serde_json::Value {
        let result = match self {
            EntryPayload::Feed(p) => serde_json::to_value(p),
            EntryPayload::Diaper(p) => serde_json::to_value(p),
            EntryPayload::Sleep(p) => serde_json::to_value(p),
        };
        // Payload structs contain only strings, numbers and bools.
        result.unwrap_or(serde_json::Value::Null)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Rebuilds a payload from its type tag and field blob. Fields belonging
    /// to another type are rejected.
    pub fn from_value(
        entry_type: EntryType,
        value: serde_json::Value,
    ) -> Result<Self, ModelError> {
        let invalid = |e: serde_json::Error| ModelError::InvalidPayload {
            entry_type,
            message: e.to_string(),
        };
        match entry_type {
            EntryType::Feed => serde_json::from_value(value)
                .map(EntryPayload::Feed)
                .map_err(invalid),
            EntryType::Diaper => serde_json::from_value(value)
                .map(EntryPayload::Diaper)
                .map_err(invalid),
            EntryType::Sleep => serde_json::from_value(value)
                .map(EntryPayload::Sleep)
                .map_err(invalid),
        }
    }

    pub fn from_json(entry_type: EntryType, json: &str) -> Result<Self, ModelError> {
        let value = serde_json::from_str(json).map_err(|e| ModelError::InvalidPayload {
            entry_type,
            message: e.to_string(),
        })?;
        Self::from_value(entry_type, value)
    }

    pub fn as_sleep(&self) -> Option<&SleepPayload> {
        match self {
            EntryPayload::Sleep(s) => Some(s),
            EntryPayload::Feed(_) | EntryPayload::Diaper(_) => None,
        }
    }

    /// One-line human summary, used by the CLI and exports.
    pub fn summary(&self) -> String {
        match self {
            EntryPayload::Feed(f) => {
                let mut parts = vec![f.source.to_string()];
                if let Some(v) = f.volume {
                    parts.push(format!("{} {}", v, f.unit));
                }
                if let Some(d) = f.duration {
                    parts.push(format!("{} min", d));
                }
                if let Some(side) = f.side {
                    parts.push(side.to_string());
                }
                parts.join(", ")
            }
            EntryPayload::Diaper(d) => {
                let mut parts = vec![d.diaper_type.to_string()];
                if let Some(c) = d.color {
                    parts.push(c.to_string());
                }
                if let Some(c) = d.consistency {
                    parts.push(c.to_string());
                }
                parts.join(", ")
            }
            EntryPayload::Sleep(s) => {
                let kind = if s.is_nap { "nap" } else { "night" };
                match s.end_time {
                    Some(_) => format!("{} ({} min)", kind, s.minutes()),
                    None => format!("{} (in progress)", kind),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_vocabulary_from_str() {
        assert_eq!(FeedSource::from_str("Breast").unwrap(), FeedSource::Breast);
        assert_eq!(
            FormulaType::from_str("breast_milk").unwrap(),
            FormulaType::BreastMilk
        );
        let err = DiaperType::from_str("soaked").unwrap_err();
        assert!(err.contains("wet, dirty, mixed, dry"));
    }

    #[test]
    fn test_feed_payload_camel_case_fields() {
        let payload = EntryPayload::Feed(
            FeedPayload::new(FeedSource::Bottle, VolumeUnit::Ml)
                .with_volume(120.0)
                .with_formula_type(FormulaType::BreastMilk),
        );
        assert_eq!(
            payload.to_value(),
            json!({"source": "bottle", "unit": "ml", "volume": 120.0, "formulaType": "breast_milk"})
        );
    }

    #[test]
    fn test_blob_roundtrip_per_type() {
        let start = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        let payloads = [
            EntryPayload::Feed(
                FeedPayload::new(FeedSource::Breast, VolumeUnit::Ml)
                    .with_duration(15)
                    .with_side(BreastSide::Left),
            ),
            EntryPayload::Diaper(
                DiaperPayload::new(DiaperType::Dirty)
                    .with_color(DiaperColor::Yellow)
                    .with_consistency(Consistency::Soft),
            ),
            EntryPayload::Sleep(
                SleepPayload::started(start, true)
                    .with_quality(SleepQuality::try_from(4).unwrap())
                    .finish(start + chrono::Duration::minutes(45))
                    .unwrap(),
            ),
        ];

        for payload in payloads {
            let decoded = EntryPayload::from_json(payload.entry_type(), &payload.to_json()).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_mixed_payload_rejected() {
        let blob = json!({"diaperType": "wet", "source": "breast"});
        let err = EntryPayload::from_value(EntryType::Diaper, blob).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidPayload {
                entry_type: EntryType::Diaper,
                ..
            }
        ));
    }

    #[test]
    fn test_payload_under_wrong_type_rejected() {
        let blob = json!({"diaperType": "wet"});
        assert!(EntryPayload::from_value(EntryType::Feed, blob).is_err());
    }

    #[test]
    fn test_quality_bounds() {
        assert!(SleepQuality::try_from(0).is_err());
        assert!(SleepQuality::try_from(6).is_err());
        assert_eq!(SleepQuality::try_from(5).unwrap().value(), 5);

        let blob = json!({"startTime": "2024-01-01T00:00:00.000Z", "isNap": false, "quality": 9});
        assert!(EntryPayload::from_value(EntryType::Sleep, blob).is_err());
    }

    #[test]
    fn test_sleep_finish() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let sleep = SleepPayload::started(start, false);
        assert!(sleep.in_progress());
        assert_eq!(sleep.minutes(), 0);

        let done = sleep
            .clone()
            .finish(start + chrono::Duration::minutes(90))
            .unwrap();
        assert!(!done.in_progress());
        assert_eq!(done.duration, Some(90));
        assert_eq!(done.minutes(), 90);

        assert!(matches!(
            sleep.finish(start - chrono::Duration::minutes(1)),
            Err(ModelError::SleepEndsBeforeStart)
        ));
    }

    #[test]
    fn test_tagged_json_representation() {
        let payload = EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, json!({"type": "diaper", "diaperType": "wet"}));
        let parsed: EntryPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_summary() {
        let feed = EntryPayload::Feed(
            FeedPayload::new(FeedSource::Bottle, VolumeUnit::Oz).with_volume(4.0),
        );
        assert_eq!(feed.summary(), "bottle, 4 oz");
    }
}
