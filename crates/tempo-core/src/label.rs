use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::datetime::{add_months_clamped, format_date, months_between};

/// Semantic label kind. The engine never renders text; callers map each kind
/// and its params onto a localized string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    StartsInMinutes,
    StartsInHours,
    StartsInDays,
    StartsTomorrow,
    StartsOnDate,
    NoDeadline,
    OverdueMinutes,
    OverdueHours,
    OverdueDays,
    DueNow,
    RemainingMinutes,
    RemainingHours,
    RemainingDays,
    RemainingMonths,
    RemainingYears,
}

impl LabelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelKind::StartsInMinutes => "starts_in_minutes",
            LabelKind::StartsInHours => "starts_in_hours",
            LabelKind::StartsInDays => "starts_in_days",
            LabelKind::StartsTomorrow => "starts_tomorrow",
            LabelKind::StartsOnDate => "starts_on_date",
            LabelKind::NoDeadline => "no_deadline",
            LabelKind::OverdueMinutes => "overdue_minutes",
            LabelKind::OverdueHours => "overdue_hours",
            LabelKind::OverdueDays => "overdue_days",
            LabelKind::DueNow => "due_now",
            LabelKind::RemainingMinutes => "remaining_minutes",
            LabelKind::RemainingHours => "remaining_hours",
            LabelKind::RemainingDays => "remaining_days",
            LabelKind::RemainingMonths => "remaining_months",
            LabelKind::RemainingYears => "remaining_years",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Neutral,
    Warning,
    Critical,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LabelParam {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeLabel {
    pub kind: LabelKind,
    pub params: BTreeMap<&'static str, LabelParam>,
    pub severity: Severity,
}

impl TimeLabel {
    fn new(kind: LabelKind, severity: Severity) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
            severity,
        }
    }

    fn with(mut self, name: &'static str, value: i64) -> Self {
        self.params.insert(name, LabelParam::Number(value));
        self
    }

    fn with_text(mut self, name: &'static str, value: String) -> Self {
        self.params.insert(name, LabelParam::Text(value));
        self
    }

    pub fn number(&self, name: &str) -> Option<i64> {
        match self.params.get(name) {
            Some(LabelParam::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(LabelParam::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }
}

/// Classifies `resolved` against `now`. A future `period_start` takes
/// precedence over the due date.
pub fn label(resolved: Option<DateTime<Utc>>, now: DateTime<Utc>, period_start: Option<DateTime<Utc>>) -> TimeLabel {
    if let Some(start) = period_start.filter(|start| *start > now) {
        return starts_label(start, now);
    }

    let Some(resolved) = resolved else {
        return TimeLabel::new(LabelKind::NoDeadline, Severity::Neutral);
    };

    if resolved < now {
        return overdue_label(now - resolved);
    }
    remaining_label(resolved, now)
}

fn starts_label(start: DateTime<Utc>, now: DateTime<Utc>) -> TimeLabel {
    let until = start - now;
    let calendar_days = (start.date_naive() - now.date_naive()).num_days();

    if until < Duration::hours(1) {
        TimeLabel::new(LabelKind::StartsInMinutes, Severity::Neutral).with("minutes", until.num_minutes().max(1))
    } else if until < Duration::hours(24) {
        TimeLabel::new(LabelKind::StartsInHours, Severity::Neutral).with("hours", until.num_hours())
    } else if calendar_days == 1 {
        TimeLabel::new(LabelKind::StartsTomorrow, Severity::Neutral)
    } else if until < Duration::days(7) {
        TimeLabel::new(LabelKind::StartsInDays, Severity::Neutral).with("days", calendar_days)
    } else {
        TimeLabel::new(LabelKind::StartsOnDate, Severity::Neutral).with_text("date", format_date(start.date_naive()))
    }
}

fn overdue_label(elapsed: Duration) -> TimeLabel {
    if elapsed < Duration::hours(1) {
        TimeLabel::new(LabelKind::OverdueMinutes, Severity::Overdue).with("minutes", elapsed.num_minutes().max(1))
    } else if elapsed < Duration::hours(24) {
        TimeLabel::new(LabelKind::OverdueHours, Severity::Overdue).with("hours", elapsed.num_hours())
    } else {
        TimeLabel::new(LabelKind::OverdueDays, Severity::Overdue).with("days", elapsed.num_days())
    }
}

fn remaining_label(resolved: DateTime<Utc>, now: DateTime<Utc>) -> TimeLabel {
    let remaining = resolved - now;

    if remaining < Duration::minutes(1) {
        return TimeLabel::new(LabelKind::DueNow, Severity::Critical);
    }
    if remaining < Duration::hours(1) {
        return TimeLabel::new(LabelKind::RemainingMinutes, Severity::Critical).with("minutes", remaining.num_minutes());
    }
    if remaining < Duration::hours(24) {
        return TimeLabel::new(LabelKind::RemainingHours, Severity::Warning).with("hours", remaining.num_hours());
    }

    let months = whole_months(now, resolved);
    if months >= 12 {
        TimeLabel::new(LabelKind::RemainingYears, Severity::Neutral)
            .with("years", months / 12)
            .with("months", months % 12)
    } else if months >= 1 {
        let days = shift_months(now, months)
            .map(|base| (resolved - base).num_days())
            .unwrap_or_default();
        TimeLabel::new(LabelKind::RemainingMonths, Severity::Neutral)
            .with("months", months)
            .with("days", days)
    } else {
        TimeLabel::new(LabelKind::RemainingDays, Severity::Neutral).with("days", remaining.num_days())
    }
}

/// Whole calendar months `m` such that `now` shifted by `m` months is not
/// after `target`.
fn whole_months(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let months = months_between(now.date_naive(), target.date_naive());
    match shift_months(now, months) {
        Some(shifted) if shifted <= target => months,
        _ => (months - 1).max(0),
    }
}

fn shift_months(dt: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    add_months_clamped(dt.date_naive(), months).map(|date: NaiveDate| date.and_time(dt.time()).and_utc())
}
