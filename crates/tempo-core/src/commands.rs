use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use tracing::{debug, info, instrument};

use crate::agenda::{AgendaQuery, SortMode, Tab, categorize};
use crate::cli::{Command, Repeat, ScheduleArgs};
use crate::completion::toggle;
use crate::config::Config;
use crate::datastore::{DataStore, find_task};
use crate::datetime::{parse_date_expr, parse_instant, parse_weekday_name, start_of_day};
use crate::finder::NextInstanceFinder;
use crate::recurrence::{
    CustomUnit, DateKey, EndCondition, PeriodStart, RecurrenceRule, RecurrenceSettings, TimeOfDay, WeekdaySet,
};
use crate::render::Renderer;
use crate::task::Task;

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let holidays = cfg.holidays()?;
    let finder = NextInstanceFinder::new(&holidays, cfg.search_horizon()?);

    let command = command.unwrap_or(Command::List {
        tab: None,
        sort: None,
        at: None,
    });
    debug!(?command, "dispatching command");

    match command {
        Command::List { tab, sort, at } => {
            let tab = tab.map_or_else(|| cfg.default_tab(), Ok)?;
            let sort = sort.map_or_else(|| cfg.default_sort(), Ok)?;
            let at = at.map(|expr| parse_date_expr(&expr, now)).transpose()?.unwrap_or(now);
            cmd_list(store, renderer, &finder, tab, sort, at)
        }
        Command::Add {
            title,
            deadline,
            priority,
            folder,
            memo,
            custom_order,
            schedule,
        } => {
            let mut task = Task::new(title.join(" "));
            task.recurrence = build_schedule(deadline.as_deref(), &schedule, now)?;
            if task.recurrence.is_none() {
                task.deadline = deadline.map(|expr| normalize_deadline(&expr, now)).transpose()?;
            }
            task.priority = priority;
            task.folder = folder;
            task.memo = memo;
            task.custom_order = custom_order;
            cmd_add(store, task)
        }
        Command::Next { id, from } => {
            let from = from.map(|expr| parse_date_expr(&expr, now)).transpose()?.unwrap_or(now);
            cmd_next(store, &finder, &id, from)
        }
        Command::Done { id, date } => {
            let key = date.map(|raw| raw.parse::<DateKey>()).transpose()?;
            cmd_done(store, &finder, &id, key, now)
        }
        Command::Info { id } => cmd_info(store, renderer, &finder, &id, now),
        Command::Delete { id } => cmd_delete(store, &id),
        Command::Export => cmd_export(store),
    }
}

#[instrument(skip(store, renderer, finder))]
fn cmd_list(
    store: &DataStore,
    renderer: &mut Renderer,
    finder: &NextInstanceFinder<'_>,
    tab: Tab,
    sort: SortMode,
    at: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");
    let tasks = store.load_tasks()?;
    let query = AgendaQuery { now: at, tab, sort };
    let rows = categorize(&tasks, &query, finder);
    let grouped = tab == Tab::Incomplete && sort == SortMode::Deadline;
    renderer.print_agenda(&rows, at, grouped)
}

#[instrument(skip(store, task), fields(id = %task.id))]
fn cmd_add(store: &DataStore, task: Task) -> anyhow::Result<()> {
    info!("command add");
    let id = task.id.clone();
    let tasks = store.add_task(task)?;
    debug!(count = tasks.len(), "task added");
    println!("Created task {id}.");
    Ok(())
}

#[instrument(skip(store, finder))]
fn cmd_next(store: &DataStore, finder: &NextInstanceFinder<'_>, id: &str, from: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command next");
    let tasks = store.load_tasks()?;
    let task = find_task(&tasks, id)?;
    if !task.is_repeating() {
        return Err(anyhow!("task {} does not repeat", task.id));
    }

    match finder.find(task, from) {
        Some(next) => println!("{}", next.to_rfc3339()),
        None => println!("No outstanding occurrence."),
    }
    Ok(())
}

#[instrument(skip(store, finder, now))]
fn cmd_done(
    store: &DataStore,
    finder: &NextInstanceFinder<'_>,
    id: &str,
    key: Option<DateKey>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command done");
    let tasks = store.load_tasks()?;
    let task = find_task(&tasks, id)?;

    let key = match key {
        Some(key) => Some(key),
        None if task.is_repeating() => {
            let next = finder
                .find(task, start_of_day(now))
                .ok_or_else(|| anyhow!("task {} has no outstanding occurrence", task.id))?;
            Some(DateKey::of(next))
        }
        None => None,
    };

    let updated = toggle(task, key.as_ref(), now)?;
    let message = match (&key, updated.is_repeating()) {
        (Some(key), true) if updated.completed_instance_dates.contains(key) => {
            format!("Completed occurrence {key} of '{}'.", updated.title)
        }
        (Some(key), true) => format!("Reopened occurrence {key} of '{}'.", updated.title),
        _ if updated.completed_at.is_some() => format!("Completed '{}'.", updated.title),
        _ => format!("Reopened '{}'.", updated.title),
    };

    store.replace_task(updated)?;
    println!("{message}");
    Ok(())
}

#[instrument(skip(store, renderer, finder, now))]
fn cmd_info(
    store: &DataStore,
    renderer: &mut Renderer,
    finder: &NextInstanceFinder<'_>,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");
    let tasks = store.load_tasks()?;
    let task = find_task(&tasks, id)?;
    let next = finder.find(task, start_of_day(now));
    renderer.print_task_info(task, next, now)
}

#[instrument(skip(store))]
fn cmd_delete(store: &DataStore, id: &str) -> anyhow::Result<()> {
    info!("command delete");
    let tasks = store.load_tasks()?;
    let full_id = find_task(&tasks, id)?.id.clone();
    let removed = store.remove_task(&full_id)?;
    println!("Deleted '{}'.", removed.title);
    Ok(())
}

#[instrument(skip(store))]
fn cmd_export(store: &DataStore) -> anyhow::Result<()> {
    info!("command export");
    let tasks = store.load_tasks()?;
    let json = serde_json::to_string_pretty(&tasks).context("failed to serialize tasks")?;
    println!("{json}");
    Ok(())
}

/// Stores a deadline as RFC 3339, keeping bare dates as all-day.
fn normalize_deadline(expr: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
    if let Some((_, false)) = parse_instant(expr) {
        return Ok(expr.trim().to_string());
    }
    let instant = parse_date_expr(expr, now)?;
    Ok(instant.to_rfc3339())
}

/// Turns `add` schedule options into settings anchored at `deadline`, or at
/// today (all-day) when no deadline is given. `None` without `--repeat` and
/// `--starts`.
fn build_schedule(
    deadline: Option<&str>,
    args: &ScheduleArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<RecurrenceSettings>> {
    let Some(repeat) = args.repeat else {
        let Some(starts) = &args.starts else {
            return Ok(None);
        };
        let expr = deadline.ok_or_else(|| anyhow!("--starts needs --deadline or --repeat"))?;
        let (date, time) = parse_point(expr, now)?;
        let mut settings = RecurrenceSettings::once(date, time);
        settings.period_start = Some(parse_period_start(starts, now)?);
        return Ok(Some(settings));
    };

    let (anchor_date, anchor_time) = match deadline {
        Some(expr) => parse_point(expr, now)?,
        None => (now.date_naive(), None),
    };
    let interval = args.every.unwrap_or(1);

    if !args.on.is_empty() && repeat != Repeat::Weekly {
        return Err(anyhow!("--on only applies to weekly repeats"));
    }
    let rule = match repeat {
        Repeat::Daily => RecurrenceRule::Daily { interval },
        Repeat::Hourly => RecurrenceRule::Custom {
            interval,
            unit: CustomUnit::Hours,
        },
        Repeat::Weekly => {
            let days_of_week = if args.on.is_empty() {
                WeekdaySet::new([weekday_index(anchor_date.weekday())])
            } else {
                args.on
                    .iter()
                    .map(|name| {
                        parse_weekday_name(&name.trim().to_ascii_lowercase())
                            .map(weekday_index)
                            .ok_or_else(|| anyhow!("unknown weekday: {name}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map(WeekdaySet::new)?
            };
            RecurrenceRule::Weekly { interval, days_of_week }
        }
        Repeat::Monthly | Repeat::Yearly if args.every.is_some_and(|n| n != 1) => {
            return Err(anyhow!("--every is not supported for monthly or yearly repeats"));
        }
        Repeat::Monthly => RecurrenceRule::Monthly,
        Repeat::Yearly => RecurrenceRule::Yearly,
    };

    let mut settings = RecurrenceSettings::new(rule, anchor_date, anchor_time);
    settings.end_condition = match (&args.until, args.times) {
        (Some(until), _) => EndCondition::OnDate {
            date: parse_date_expr(until, now)?.date_naive(),
        },
        (None, Some(count)) => EndCondition::AfterOccurrences { count },
        (None, None) => EndCondition::Never,
    };
    settings.period_start = args.starts.as_deref().map(|expr| parse_period_start(expr, now)).transpose()?;
    settings.exclude_holidays = args.skip_holidays;
    debug!(rule = settings.rule.name(), anchor = %anchor_date, "built schedule");
    Ok(Some(settings))
}

/// Date and optional time of day named by a date expression. Bare dates and
/// day names such as `tomorrow` are all-day.
fn parse_point(expr: &str, now: DateTime<Utc>) -> anyhow::Result<(NaiveDate, Option<TimeOfDay>)> {
    let instant = parse_date_expr(expr, now)?;
    let timed = parse_instant(expr).map_or(instant.time() != NaiveTime::MIN, |(_, timed)| timed);
    let time = timed.then(|| TimeOfDay::new(instant.hour(), instant.minute()));
    Ok((instant.date_naive(), time))
}

fn parse_period_start(expr: &str, now: DateTime<Utc>) -> anyhow::Result<PeriodStart> {
    let (date, time) = parse_point(expr, now)?;
    Ok(PeriodStart { date, time })
}

fn weekday_index(day: Weekday) -> u8 {
    match day {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}
