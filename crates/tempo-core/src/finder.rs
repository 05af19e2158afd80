//! Next outstanding occurrence of a repeating task.
//!
//! Occurrences are indexed: occurrence `n` is always computed as
//! `anchor + n * step`, with month and year steps clamped to the target
//! month's last day. Nothing is ever derived from a previously clamped
//! candidate, so the coarse jump and the fine scan agree on every index.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, trace};

use crate::datetime::{add_months_clamped, add_years_clamped, end_of_day, months_between, week_start_sunday};
use crate::holiday::{HolidayCalendar, NoHolidays};
use crate::recurrence::{CustomUnit, DateKey, EndCondition, RecurrenceRule, RecurrenceSettings, WeekdaySet};
use crate::task::Task;

/// Five years of days plus two weeks of slack.
pub const DEFAULT_MAX_ITERATIONS: usize = 5 * 366 + 14;

/// Distance between consecutive indexed candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Hours(i64),
    Days(i64),
    Months(i64),
    Years(i64),
}

/// Weekly schedules scan day by day and admit only flagged weekdays in
/// weeks that are a multiple of `interval` away from the anchor's week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekFilter {
    days: WeekdaySet,
    interval: i64,
    anchor_week: NaiveDate,
}

impl WeekFilter {
    fn admits(&self, date: NaiveDate) -> bool {
        if !self.days.contains(date.weekday().num_days_from_sunday()) {
            return false;
        }
        let weeks = (week_start_sunday(date) - self.anchor_week).num_days().div_euclid(7);
        weeks.rem_euclid(self.interval) == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    pub step: Step,
    pub filter: Option<WeekFilter>,
}

impl Cadence {
    /// `None` for one-shot schedules and for weekly rules without weekdays,
    /// which have no occurrences at all.
    pub fn of(settings: &RecurrenceSettings) -> Option<Self> {
        let cadence = match &settings.rule {
            RecurrenceRule::None => return None,
            RecurrenceRule::Daily { interval } => Self::plain(Step::Days(step_size(*interval))),
            RecurrenceRule::Weekly { interval, days_of_week } => {
                if days_of_week.is_empty() {
                    debug!("weekly schedule without weekdays has no occurrences");
                    return None;
                }
                Self {
                    step: Step::Days(1),
                    filter: Some(WeekFilter {
                        days: days_of_week.clone(),
                        interval: step_size(*interval),
                        anchor_week: week_start_sunday(settings.anchor_date),
                    }),
                }
            }
            RecurrenceRule::Monthly => Self::plain(Step::Months(1)),
            RecurrenceRule::Yearly => Self::plain(Step::Years(1)),
            RecurrenceRule::Custom { interval, unit } => match unit {
                CustomUnit::Hours => Self::plain(Step::Hours(step_size(*interval))),
                CustomUnit::Days => Self::plain(Step::Days(step_size(*interval))),
            },
        };
        Some(cadence)
    }

    fn plain(step: Step) -> Self {
        Self { step, filter: None }
    }

    fn admits(&self, date: NaiveDate) -> bool {
        self.filter.as_ref().is_none_or(|f| f.admits(date))
    }
}

fn step_size(interval: u32) -> i64 {
    i64::from(interval.max(1))
}

/// Candidate number `index` counted from `anchor`. `None` only when the
/// result leaves chrono's representable range.
pub fn occurrence_at(anchor: NaiveDateTime, step: Step, index: i64) -> Option<NaiveDateTime> {
    match step {
        Step::Hours(k) => anchor.checked_add_signed(Duration::try_hours(k.checked_mul(index)?)?),
        Step::Days(k) => anchor.checked_add_signed(Duration::try_days(k.checked_mul(index)?)?),
        Step::Months(k) => {
            add_months_clamped(anchor.date(), k.checked_mul(index)?).map(|d| d.and_time(anchor.time()))
        }
        Step::Years(k) => {
            add_years_clamped(anchor.date(), k.checked_mul(index)?).map(|d| d.and_time(anchor.time()))
        }
    }
}

/// Largest index whose candidate lies at or before `from`, found by calendar
/// arithmetic. Hour steps never jump and always start from the anchor.
pub fn coarse_align(anchor: NaiveDateTime, step: Step, from: NaiveDateTime) -> i64 {
    if from <= anchor {
        return 0;
    }
    let index = match step {
        Step::Hours(_) => return 0,
        Step::Days(k) => (from - anchor).num_seconds().div_euclid(k * 86_400),
        Step::Months(k) => months_between(anchor.date(), from.date()).div_euclid(k),
        Step::Years(k) => i64::from(from.year() - anchor.year()).div_euclid(k),
    };
    let overshoots = occurrence_at(anchor, step, index).is_none_or(|candidate| candidate > from);
    if overshoots { (index - 1).max(0) } else { index.max(0) }
}

pub struct NextInstanceFinder<'a> {
    holidays: &'a dyn HolidayCalendar,
    max_iterations: usize,
}

impl Default for NextInstanceFinder<'static> {
    fn default() -> Self {
        Self {
            holidays: &NoHolidays,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl<'a> NextInstanceFinder<'a> {
    pub fn new(holidays: &'a dyn HolidayCalendar, max_iterations: usize) -> Self {
        Self {
            holidays,
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Earliest occurrence at or after `max(from, anchor)` that is not yet
    /// completed, admitted by the weekday filter and the holiday calendar, and
    /// not cut off by the end condition. `None` when the task does not repeat,
    /// has no occurrences left, or the search horizon runs out.
    #[tracing::instrument(skip(self, task), fields(task = %task.id))]
    pub fn find(&self, task: &Task, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let settings = task.active_recurrence()?;
        let cadence = Cadence::of(settings)?;

        if let EndCondition::AfterOccurrences { count } = settings.end_condition
            && task.completed_instance_dates.len() >= count as usize
        {
            debug!(count, "occurrence count reached");
            return None;
        }
        let cutoff = match settings.end_condition {
            EndCondition::OnDate { date } => Some(end_of_day(date)),
            EndCondition::Never | EndCondition::AfterOccurrences { .. } => None,
        };

        let anchor = settings.anchor_naive();
        let from = from.naive_utc();
        let mut index = coarse_align(anchor, cadence.step, from);
        trace!(index, step = ?cadence.step, "aligned search start");

        for _ in 0..self.max_iterations {
            let candidate = occurrence_at(anchor, cadence.step, index)?;
            index += 1;

            if cutoff.is_some_and(|limit| candidate > limit) {
                debug!(%candidate, "past end date");
                return None;
            }
            if !cadence.admits(candidate.date()) {
                continue;
            }
            if settings.exclude_holidays && self.holidays.is_holiday(candidate.date()) {
                continue;
            }
            if candidate >= from && !task.completed_instance_dates.contains(&DateKey::from(candidate.date())) {
                return Some(candidate.and_utc());
            }
        }

        debug!(max_iterations = self.max_iterations, "search horizon exhausted");
        None
    }
}

/// Convenience over [`NextInstanceFinder::find`] with no holidays and the
/// default horizon.
pub fn next_instance(task: &Task, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    NextInstanceFinder::default().find(task, from)
}
