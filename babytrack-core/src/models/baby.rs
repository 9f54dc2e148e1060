use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ModelError;
use crate::timefmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Metric => write!(f, "metric"),
            Units::Imperial => write!(f, "imperial"),
        }
    }
}

impl FromStr for Units {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(ModelError::UnknownUnits(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baby {
    pub id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub preferred_units: Units,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Baby {
    pub fn from_new(new: NewBaby, id: Uuid, created_at: DateTime<Utc>) -> Self {
        let created_at = timefmt::truncate(created_at);
        Self {
            id,
            name: new.name,
            birth_date: new.birth_date,
            preferred_units: new.preferred_units,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn apply(&mut self, update: &BabyUpdate, updated_at: DateTime<Utc>) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(birth_date) = update.birth_date {
            self.birth_date = birth_date;
        }
        if let Some(units) = update.preferred_units {
            self.preferred_units = units;
        }
        self.updated_at = timefmt::truncate(updated_at);
    }

    /// Age in whole days on the given date.
    pub fn age_days(&self, on: NaiveDate) -> i64 {
        (on - self.birth_date).num_days()
    }
}

impl fmt::Display for Baby {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (born {}, {})",
            self.name,
            timefmt::encode_date(&self.birth_date),
            self.preferred_units
        )
    }
}

/// Input for creating a baby; id and timestamps are assigned on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBaby {
    pub name: String,
    pub birth_date: NaiveDate,
    #[serde(default)]
    pub preferred_units: Units,
}

impl NewBaby {
    pub fn new(name: impl Into<String>, birth_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            birth_date,
            preferred_units: Units::default(),
        }
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.preferred_units = units;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BabyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_units: Option<Units>,
}

impl BabyUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.birth_date.is_none() && self.preferred_units.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_units_parse_and_display() {
        assert_eq!(Units::from_str("Imperial").unwrap(), Units::Imperial);
        assert_eq!(Units::Metric.to_string(), "metric");
        assert!(Units::from_str("cubits").is_err());
        assert_eq!(serde_json::to_string(&Units::Metric).unwrap(), "\"metric\"");
    }

    #[test]
    fn test_from_new() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let baby = Baby::from_new(
            NewBaby::new("Test Baby", new_year()).with_units(Units::Metric),
            id,
            now,
        );
        assert_eq!(baby.id, id);
        assert_eq!(baby.name, "Test Baby");
        assert_eq!(baby.preferred_units, Units::Metric);
        assert_eq!(baby.created_at, timefmt::truncate(now));
        assert_eq!(baby.created_at, baby.updated_at);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut baby = Baby::from_new(NewBaby::new("Ada", new_year()), Uuid::new_v4(), Utc::now());
        let later = baby.created_at + chrono::Duration::minutes(1);
        baby.apply(
            &BabyUpdate {
                preferred_units: Some(Units::Imperial),
                ..Default::default()
            },
            later,
        );
        assert_eq!(baby.name, "Ada");
        assert_eq!(baby.preferred_units, Units::Imperial);
        assert_eq!(baby.updated_at, later);
    }

    #[test]
    fn test_age_days() {
        let baby = Baby::from_new(NewBaby::new("Ada", new_year()), Uuid::new_v4(), Utc::now());
        assert_eq!(baby.age_days(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()), 30);
    }
}
