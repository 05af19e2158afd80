use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

/// Source of non-working days consulted for schedules with
/// `excludeHolidays` set.
pub trait HolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHolidays;

impl HolidayCalendar for NoHolidays {
    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct HolidaySet {
    dates: BTreeSet<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct HolidayFile {
    #[serde(default)]
    dates: Vec<NaiveDate>,
}

impl HolidaySet {
    pub fn from_dates<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    /// Loads a TOML file of the form `dates = ["2024-12-25", ...]`.
    #[tracing::instrument(skip(path), fields(file = %path.display()))]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read holiday file {}", path.display()))?;
        let parsed: HolidayFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse holiday file {}", path.display()))?;
        info!(count = parsed.dates.len(), "loaded holidays");
        Ok(Self::from_dates(parsed.dates))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl HolidayCalendar for HolidaySet {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        let hit = self.dates.contains(&date);
        if hit {
            debug!(%date, "date is a holiday");
        }
        hit
    }
}
