use chrono::{DateTime, Utc};

use crate::datetime::parse_instant;
use crate::recurrence::RecurrenceSettings;
use crate::task::Task;

/// Effective due instant of a task.
///
/// A one-shot schedule resolves to its anchor (date plus time, or midnight
/// when all-day). A repeating schedule never does: its anchor is only the
/// first occurrence, so callers wanting the current one go through
/// [`crate::finder::NextInstanceFinder`]. Otherwise the legacy flat deadline
/// is parsed as UTC, and with neither source the result is `None`.
pub fn resolve_due(task: &Task) -> Option<DateTime<Utc>> {
    if let Some(settings) = one_shot(task) {
        return Some(settings.anchor_instant());
    }

    let raw = task.deadline.as_deref()?;
    let parsed = parse_instant(raw);
    if parsed.is_none() {
        tracing::warn!(task = %task.id, deadline = raw, "unparseable deadline; treating as undated");
    }
    parsed.map(|(instant, _)| instant)
}

/// Whether the resolved due instant carries an explicit time of day.
pub fn has_time_of_day(task: &Task) -> bool {
    match one_shot(task) {
        Some(settings) => !settings.is_all_day(),
        None => task
            .deadline
            .as_deref()
            .and_then(parse_instant)
            .is_some_and(|(_, timed)| timed),
    }
}

fn one_shot(task: &Task) -> Option<&RecurrenceSettings> {
    task.recurrence.as_ref().filter(|r| !r.is_repeating())
}
