use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::datetime::start_of_day;
use crate::finder::NextInstanceFinder;
use crate::recurrence::DateKey;
use crate::task::Task;

/// Returns a new record with completion flipped.
///
/// A repeating task flips membership of `instance` in its completed
/// occurrence set and requires the key. Any other task flips `completed_at`
/// between unset and `now`. Applying the same toggle twice restores the input.
#[tracing::instrument(skip(task, now), fields(task = %task.id))]
pub fn toggle(task: &Task, instance: Option<&DateKey>, now: DateTime<Utc>) -> anyhow::Result<Task> {
    let mut next = task.clone();

    if task.is_repeating() {
        let key = instance.ok_or_else(|| {
            anyhow!("task {} repeats; an occurrence date is required to toggle it", task.id)
        })?;
        if next.completed_instance_dates.remove(key) {
            info!(occurrence = %key, "occurrence reopened");
        } else {
            next.completed_instance_dates.insert(*key);
            info!(occurrence = %key, "occurrence completed");
        }
    } else {
        next.completed_at = match task.completed_at {
            Some(_) => None,
            None => Some(now),
        };
        info!(completed = next.completed_at.is_some(), "task completion toggled");
    }

    Ok(next)
}

pub fn is_occurrence_completed(task: &Task, key: &DateKey) -> bool {
    task.completed_instance_dates.contains(key)
}

/// A plain task is done once `completed_at` is set; a repeating one once no
/// outstanding occurrence remains from the start of `now`'s day.
pub fn is_fully_completed(task: &Task, now: DateTime<Utc>, finder: &NextInstanceFinder<'_>) -> bool {
    if task.is_repeating() {
        finder.find(task, start_of_day(now)).is_none()
    } else {
        task.completed_at.is_some()
    }
}
