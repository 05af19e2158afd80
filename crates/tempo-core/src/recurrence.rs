use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::datetime::{at_utc, format_date};

/// Hour and minute of an occurrence. Absent means the occurrence is all-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.min(23), self.minute.min(59), 0).unwrap_or(NaiveTime::MIN)
    }
}

/// UTC calendar date identifying one occurrence, serialized as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn of(instant: DateTime<Utc>) -> Self {
        Self(instant.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_date(self.0))
    }
}

impl FromStr for DateKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|e| anyhow!("invalid date key {s:?}: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CustomUnit {
    Hours,
    #[default]
    Days,
}

impl Serialize for CustomUnit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(match self {
            CustomUnit::Hours => "hours",
            CustomUnit::Days => "days",
        })
    }
}

impl<'de> Deserialize<'de> for CustomUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "hours" | "hour" => CustomUnit::Hours,
            "days" | "day" => CustomUnit::Days,
            other => {
                tracing::warn!(unit = other, "unknown custom unit; using days");
                CustomUnit::Days
            }
        })
    }
}

/// Weekdays an occurrence may fall on, `0` = Sunday through `6` = Saturday.
///
/// Decodes either a list of indices or a seven-slot list of flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeekdaySet(BTreeSet<u8>);

impl WeekdaySet {
    pub fn new<I: IntoIterator<Item = u8>>(days: I) -> Self {
        Self(days.into_iter().filter(|d| *d <= 6).collect())
    }

    pub fn contains(&self, day_from_sunday: u32) -> bool {
        u8::try_from(day_from_sunday).is_ok_and(|d| self.0.contains(&d))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Indices(Vec<u8>),
            Flags(Vec<bool>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Indices(days)) => WeekdaySet::new(days),
            Some(Raw::Flags(flags)) => WeekdaySet::new(
                flags
                    .into_iter()
                    .zip(0u8..7)
                    .filter_map(|(on, day)| on.then_some(day)),
            ),
            None => WeekdaySet::default(),
        })
    }
}

fn default_interval() -> u32 {
    1
}

/// Repetition rule, discriminated by `frequency`. Each variant carries only
/// the fields its frequency uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RecurrenceRule {
    None,
    Daily {
        #[serde(default = "default_interval")]
        interval: u32,
    },
    Weekly {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default)]
        days_of_week: WeekdaySet,
    },
    Monthly,
    Yearly,
    Custom {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default, rename = "customUnit")]
        unit: CustomUnit,
    },
}

impl RecurrenceRule {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, RecurrenceRule::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecurrenceRule::None => "none",
            RecurrenceRule::Daily { .. } => "daily",
            RecurrenceRule::Weekly { .. } => "weekly",
            RecurrenceRule::Monthly => "monthly",
            RecurrenceRule::Yearly => "yearly",
            RecurrenceRule::Custom { .. } => "custom",
        }
    }
}

/// Visibility gate: nothing shows as outstanding before this instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStart {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeOfDay>,
}

impl PeriodStart {
    pub fn instant(&self) -> DateTime<Utc> {
        at_utc(self.date, self.time.map(TimeOfDay::to_naive).unwrap_or(NaiveTime::MIN))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EndCondition {
    #[default]
    Never,
    OnDate {
        date: NaiveDate,
    },
    AfterOccurrences {
        count: u32,
    },
}

/// Schedule attached to a task. Replaced whole on edit, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceSettings {
    #[serde(flatten)]
    pub rule: RecurrenceRule,
    pub anchor_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<PeriodStart>,
    #[serde(default)]
    pub end_condition: EndCondition,
    #[serde(default)]
    pub exclude_holidays: bool,
}

impl RecurrenceSettings {
    pub fn once(anchor_date: NaiveDate, anchor_time: Option<TimeOfDay>) -> Self {
        Self::new(RecurrenceRule::None, anchor_date, anchor_time)
    }

    pub fn new(rule: RecurrenceRule, anchor_date: NaiveDate, anchor_time: Option<TimeOfDay>) -> Self {
        Self {
            rule,
            anchor_date,
            anchor_time,
            period_start: None,
            end_condition: EndCondition::Never,
            exclude_holidays: false,
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.rule.is_repeating()
    }

    pub fn is_all_day(&self) -> bool {
        self.anchor_time.is_none()
    }

    pub fn anchor_naive(&self) -> NaiveDateTime {
        self.anchor_date
            .and_time(self.anchor_time.map(TimeOfDay::to_naive).unwrap_or(NaiveTime::MIN))
    }

    pub fn anchor_instant(&self) -> DateTime<Utc> {
        self.anchor_naive().and_utc()
    }

    /// Instant of the occurrence identified by `key`, at the anchor's time.
    pub fn instant_on(&self, key: &DateKey) -> DateTime<Utc> {
        at_utc(
            key.date(),
            self.anchor_time.map(TimeOfDay::to_naive).unwrap_or(NaiveTime::MIN),
        )
    }
}
