use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datetime::start_of_day;
use crate::due::{has_time_of_day, resolve_due};
use crate::finder::NextInstanceFinder;
use crate::recurrence::DateKey;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Incomplete,
    Completed,
}

impl FromStr for Tab {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incomplete" | "pending" => Ok(Tab::Incomplete),
            "completed" | "done" => Ok(Tab::Completed),
            other => Err(anyhow!("unknown tab: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Deadline,
    Custom,
    Priority,
}

impl FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deadline" | "due" => Ok(SortMode::Deadline),
            "custom" | "manual" => Ok(SortMode::Custom),
            "priority" | "pri" => Ok(SortMode::Priority),
            other => Err(anyhow!("unknown sort mode: {other}")),
        }
    }
}

/// Display partition. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Expired,
    Today,
    Tomorrow,
    ThisWeek,
    Later,
    Undated,
    Completed,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Expired => "expired",
            Bucket::Today => "today",
            Bucket::Tomorrow => "tomorrow",
            Bucket::ThisWeek => "this_week",
            Bucket::Later => "later",
            Bucket::Undated => "undated",
            Bucket::Completed => "completed",
        }
    }

    /// Date bucket of `resolved` relative to the calendar day `today`.
    pub fn for_date(resolved: Option<DateTime<Utc>>, today: NaiveDate) -> Self {
        let Some(resolved) = resolved else {
            return Bucket::Undated;
        };
        match (resolved.date_naive() - today).num_days() {
            d if d < 0 => Bucket::Expired,
            0 => Bucket::Today,
            1 => Bucket::Tomorrow,
            d if d < 7 => Bucket::ThisWeek,
            _ => Bucket::Later,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgendaQuery {
    pub now: DateTime<Utc>,
    pub tab: Tab,
    pub sort: SortMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgendaRow<'a> {
    pub task: &'a Task,
    pub resolved: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub bucket: Bucket,
    /// Occurrence the row stands for, when the task repeats.
    pub instance: Option<DateKey>,
}

/// Partitions and orders `tasks` for one tab of the list view.
#[tracing::instrument(skip(tasks, finder), fields(count = tasks.len()))]
pub fn categorize<'a>(tasks: &'a [Task], query: &AgendaQuery, finder: &NextInstanceFinder<'_>) -> Vec<AgendaRow<'a>> {
    let mut rows = match query.tab {
        Tab::Incomplete => incomplete_rows(tasks, query.now, finder),
        Tab::Completed => completed_rows(tasks),
    };

    match (query.tab, query.sort) {
        (Tab::Completed, _) => rows.sort_by(compare_completed),
        (Tab::Incomplete, SortMode::Deadline) => rows.sort_by(compare_deadline),
        (Tab::Incomplete, SortMode::Custom) => rows.sort_by(compare_custom),
        (Tab::Incomplete, SortMode::Priority) => rows.sort_by(compare_priority),
    }

    debug!(rows = rows.len(), "categorized tasks");
    rows
}

fn incomplete_rows<'a>(tasks: &'a [Task], now: DateTime<Utc>, finder: &NextInstanceFinder<'_>) -> Vec<AgendaRow<'a>> {
    let today = now.date_naive();
    let mut rows = Vec::with_capacity(tasks.len());

    for task in tasks {
        let not_started = task
            .recurrence
            .as_ref()
            .and_then(|r| r.period_start)
            .is_some_and(|start| start.instant() > now);
        if not_started {
            debug!(task = %task.id, "hidden until its period starts");
            continue;
        }

        if let Some(settings) = task.active_recurrence() {
            let Some(next) = finder.find(task, start_of_day(now)) else {
                continue;
            };
            rows.push(AgendaRow {
                task,
                resolved: Some(next),
                all_day: settings.is_all_day(),
                bucket: Bucket::for_date(Some(next), today),
                instance: Some(DateKey::of(next)),
            });
        } else if task.completed_at.is_none() {
            let resolved = resolve_due(task);
            rows.push(AgendaRow {
                task,
                resolved,
                all_day: !has_time_of_day(task),
                bucket: Bucket::for_date(resolved, today),
                instance: None,
            });
        }
    }

    rows
}

fn completed_rows(tasks: &[Task]) -> Vec<AgendaRow<'_>> {
    let mut rows = Vec::new();

    for task in tasks {
        if let Some(settings) = task.active_recurrence() {
            rows.extend(task.completed_instance_dates.iter().map(|key| AgendaRow {
                task,
                resolved: Some(settings.instant_on(key)),
                all_day: settings.is_all_day(),
                bucket: Bucket::Completed,
                instance: Some(*key),
            }));
        } else if let Some(done) = task.completed_at {
            rows.push(AgendaRow {
                task,
                resolved: Some(done),
                all_day: false,
                bucket: Bucket::Completed,
                instance: None,
            });
        }
    }

    rows
}

fn compare_deadline(a: &AgendaRow<'_>, b: &AgendaRow<'_>) -> Ordering {
    a.bucket
        .cmp(&b.bucket)
        .then_with(|| cmp_optional(a.resolved.map(|d| d.date_naive()), b.resolved.map(|d| d.date_naive())))
        .then_with(|| a.all_day.cmp(&b.all_day))
        .then_with(|| cmp_optional(a.resolved, b.resolved))
        .then_with(|| compare_titles(&a.task.title, &b.task.title))
}

fn compare_custom(a: &AgendaRow<'_>, b: &AgendaRow<'_>) -> Ordering {
    cmp_optional(a.task.custom_order, b.task.custom_order).then_with(|| compare_titles(&a.task.title, &b.task.title))
}

fn compare_priority(a: &AgendaRow<'_>, b: &AgendaRow<'_>) -> Ordering {
    b.task
        .priority
        .cmp(&a.task.priority)
        .then_with(|| compare_titles(&a.task.title, &b.task.title))
}

fn compare_completed(a: &AgendaRow<'_>, b: &AgendaRow<'_>) -> Ordering {
    cmp_optional(b.resolved, a.resolved).then_with(|| compare_titles(&a.task.title, &b.task.title))
}

/// Present values first, ascending; absent values last.
fn cmp_optional<T: Ord>(left: Option<T>, right: Option<T>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Accent and case insensitive ordering, falling back to the raw titles so
/// the order stays total.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    collation_key(a).cmp(&collation_key(b)).then_with(|| a.cmp(b))
}

fn collation_key(title: &str) -> String {
    deunicode::deunicode(title.trim()).to_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::recurrence::{EndCondition, PeriodStart, RecurrenceRule, RecurrenceSettings, TimeOfDay};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid instant")
    }

    fn dated(title: &str, day: NaiveDate, time: Option<TimeOfDay>) -> Task {
        let mut task = Task::new(title.to_string());
        task.recurrence = Some(RecurrenceSettings::once(day, time));
        task
    }

    fn titles(rows: &[AgendaRow<'_>]) -> Vec<String> {
        rows.iter().map(|r| r.task.title.clone()).collect()
    }

    fn query(now: DateTime<Utc>, tab: Tab, sort: SortMode) -> AgendaQuery {
        AgendaQuery { now, tab, sort }
    }

    #[test]
    fn buckets_follow_calendar_distance() {
        let today = date(2024, 3, 10);
        assert_eq!(Bucket::for_date(Some(at(2024, 3, 9, 23, 59)), today), Bucket::Expired);
        assert_eq!(Bucket::for_date(Some(at(2024, 3, 10, 0, 0)), today), Bucket::Today);
        assert_eq!(Bucket::for_date(Some(at(2024, 3, 11, 8, 0)), today), Bucket::Tomorrow);
        assert_eq!(Bucket::for_date(Some(at(2024, 3, 16, 23, 0)), today), Bucket::ThisWeek);
        assert_eq!(Bucket::for_date(Some(at(2024, 3, 17, 0, 0)), today), Bucket::Later);
        assert_eq!(Bucket::for_date(None, today), Bucket::Undated);
    }

    #[test]
    fn deadline_sort_orders_buckets_then_time_then_title() {
        let now = at(2024, 3, 10, 12, 0);
        let tasks = vec![
            Task::new("Undated".to_string()),
            dated("Later", date(2024, 4, 1), None),
            dated("b all day", date(2024, 3, 10), None),
            dated("a all day", date(2024, 3, 10), None),
            dated("Timed late", date(2024, 3, 10), Some(TimeOfDay::new(18, 0))),
            dated("Timed early", date(2024, 3, 10), Some(TimeOfDay::new(8, 0))),
            dated("Expired", date(2024, 3, 1), None),
            dated("Tomorrow", date(2024, 3, 11), None),
        ];
        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Deadline), &NextInstanceFinder::default());
        assert_eq!(
            titles(&rows),
            vec!["Expired", "Timed early", "Timed late", "a all day", "b all day", "Tomorrow", "Later", "Undated"]
        );
        assert_eq!(rows[1].bucket, Bucket::Today);
        assert_eq!(rows[7].bucket, Bucket::Undated);
    }

    #[test]
    fn titles_collate_without_case_or_accents() {
        assert_eq!(compare_titles("école", "Ecrire"), Ordering::Less);
        assert_eq!(compare_titles("apple", "Banana"), Ordering::Less);
        assert_ne!(compare_titles("Apple", "apple"), Ordering::Equal);
    }

    #[test]
    fn custom_sort_puts_unordered_last() {
        let now = at(2024, 3, 10, 12, 0);
        let mut tasks = vec![
            Task::new("zeta".to_string()),
            Task::new("second".to_string()),
            Task::new("alpha".to_string()),
            Task::new("first".to_string()),
        ];
        tasks[1].custom_order = Some(2);
        tasks[3].custom_order = Some(1);
        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Custom), &NextInstanceFinder::default());
        assert_eq!(titles(&rows), vec!["first", "second", "alpha", "zeta"]);
    }

    #[test]
    fn priority_sort_is_descending() {
        let now = at(2024, 3, 10, 12, 0);
        let mut tasks = vec![Task::new("low".to_string()), Task::new("b high".to_string()), Task::new("a high".to_string())];
        tasks[1].priority = 3;
        tasks[2].priority = 3;
        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Priority), &NextInstanceFinder::default());
        assert_eq!(titles(&rows), vec!["a high", "b high", "low"]);
    }

    #[test]
    fn repeating_tasks_show_their_next_occurrence() {
        let now = at(2024, 3, 10, 12, 0);
        let mut task = Task::new("Standup".to_string());
        task.recurrence = Some(RecurrenceSettings::new(
            RecurrenceRule::Daily { interval: 1 },
            date(2024, 3, 1),
            Some(TimeOfDay::new(9, 0)),
        ));
        let tasks = vec![task];
        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Deadline), &NextInstanceFinder::default());
        assert_eq!(rows.len(), 1);
        // today's 09:00 occurrence already passed but stays listed
        assert_eq!(rows[0].resolved, Some(at(2024, 3, 10, 9, 0)));
        assert_eq!(rows[0].bucket, Bucket::Today);
        assert_eq!(rows[0].instance, Some(DateKey::new(date(2024, 3, 10))));
        assert!(!rows[0].all_day);
    }

    #[test]
    fn exhausted_and_completed_tasks_leave_incomplete_tab() {
        let now = at(2024, 3, 10, 12, 0);
        let mut ended = Task::new("Ended".to_string());
        let mut settings = RecurrenceSettings::new(RecurrenceRule::Daily { interval: 1 }, date(2024, 3, 1), None);
        settings.end_condition = EndCondition::OnDate { date: date(2024, 3, 5) };
        ended.recurrence = Some(settings);

        let mut done = Task::new("Done".to_string());
        done.completed_at = Some(at(2024, 3, 9, 8, 0));

        let tasks = vec![ended, done, Task::new("Open".to_string())];
        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Deadline), &NextInstanceFinder::default());
        assert_eq!(titles(&rows), vec!["Open"]);
    }

    #[test]
    fn future_period_start_hides_task() {
        let now = at(2024, 3, 10, 12, 0);
        let mut later = dated("Later start", date(2024, 3, 10), None);
        later.recurrence.as_mut().expect("recurrence").period_start =
            Some(PeriodStart { date: date(2024, 3, 11), time: None });
        let mut tonight = dated("Starts tonight", date(2024, 3, 10), None);
        tonight.recurrence.as_mut().expect("recurrence").period_start = Some(PeriodStart {
            date: date(2024, 3, 10),
            time: Some(TimeOfDay::new(18, 0)),
        });
        let mut morning = dated("Started this morning", date(2024, 3, 10), None);
        morning.recurrence.as_mut().expect("recurrence").period_start = Some(PeriodStart {
            date: date(2024, 3, 10),
            time: Some(TimeOfDay::new(10, 0)),
        });
        let mut all_day = dated("Starts today", date(2024, 3, 10), None);
        all_day.recurrence.as_mut().expect("recurrence").period_start =
            Some(PeriodStart { date: date(2024, 3, 10), time: None });
        let tasks = vec![later, tonight, morning, all_day];
        let finder = NextInstanceFinder::default();

        let rows = categorize(&tasks, &query(now, Tab::Incomplete, SortMode::Deadline), &finder);
        assert_eq!(titles(&rows), vec!["Started this morning", "Starts today"]);

        let rows = categorize(&tasks, &query(at(2024, 3, 10, 18, 0), Tab::Incomplete, SortMode::Deadline), &finder);
        assert_eq!(titles(&rows), vec!["Started this morning", "Starts today", "Starts tonight"]);
    }

    #[test]
    fn completed_tab_expands_occurrences_newest_first() {
        let now = at(2024, 3, 10, 12, 0);
        let mut repeating = Task::new("Water plants".to_string());
        repeating.recurrence = Some(RecurrenceSettings::new(
            RecurrenceRule::Daily { interval: 1 },
            date(2024, 3, 1),
            Some(TimeOfDay::new(7, 30)),
        ));
        repeating.completed_instance_dates.insert(DateKey::new(date(2024, 3, 2)));
        repeating.completed_instance_dates.insert(DateKey::new(date(2024, 3, 8)));

        let mut plain = Task::new("Buy milk".to_string());
        plain.completed_at = Some(at(2024, 3, 5, 10, 0));

        let tasks = vec![repeating, plain, Task::new("Open".to_string())];
        let rows = categorize(&tasks, &query(now, Tab::Completed, SortMode::Priority), &NextInstanceFinder::default());
        assert_eq!(titles(&rows), vec!["Water plants", "Buy milk", "Water plants"]);
        assert_eq!(rows[0].resolved, Some(at(2024, 3, 8, 7, 30)));
        assert_eq!(rows[2].instance, Some(DateKey::new(date(2024, 3, 2))));
        assert!(rows.iter().all(|r| r.bucket == Bucket::Completed));
    }
}
