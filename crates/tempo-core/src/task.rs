use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::recurrence::{DateKey, RecurrenceSettings};

/// Stored task record.
///
/// A `recurrence` value that does not decode is kept verbatim in `extra`
/// under the same key, so the task lists as a plain one but the schedule is
/// written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    /// Flat deadline kept for records written before structured schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub completed_instance_dates: BTreeSet<DateKey>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_order: Option<i64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(title: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            memo: None,
            folder: None,
            deadline: None,
            recurrence: None,
            completed_at: None,
            completed_instance_dates: BTreeSet::new(),
            priority: 0,
            custom_order: None,
            extra: BTreeMap::new(),
        }
    }

    /// The schedule, only when it actually repeats.
    pub fn active_recurrence(&self) -> Option<&RecurrenceSettings> {
        self.recurrence.as_ref().filter(|r| r.is_repeating())
    }

    pub fn is_repeating(&self) -> bool {
        self.active_recurrence().is_some()
    }

    /// Raw schedule that failed to decode, if any.
    pub fn undecoded_recurrence(&self) -> Option<&serde_json::Value> {
        self.extra.get(RECURRENCE_KEY).filter(|_| self.recurrence.is_none())
    }
}

const RECURRENCE_KEY: &str = "recurrence";

impl Serialize for Task {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.recurrence.is_some() && self.extra.contains_key(RECURRENCE_KEY) {
            let mut current = self.clone();
            current.extra.remove(RECURRENCE_KEY);
            return Task::serialize(&current, serializer);
        }
        Task::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut task = Task::deserialize(deserializer)?;
        if let Some(raw) = task.extra.remove(RECURRENCE_KEY) {
            decode_recurrence(&mut task, raw);
        }
        Ok(task)
    }
}

/// A schedule that cannot be decoded leaves the task without one, so it
/// still lists as a plain task; the raw value goes back into `extra`.
fn decode_recurrence(task: &mut Task, raw: serde_json::Value) {
    if raw.is_null() {
        return;
    }
    match serde_json::from_value::<RecurrenceSettings>(raw.clone()) {
        Ok(settings) => task.recurrence = Some(settings),
        Err(err) => {
            tracing::warn!(task = %task.id, error = %err, "ignoring malformed recurrence settings");
            task.extra.insert(RECURRENCE_KEY.to_string(), raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::Task;
    use crate::recurrence::{RecurrenceRule, RecurrenceSettings};

    #[test]
    fn malformed_recurrence_degrades_to_none() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "title": "Water plants",
            "recurrence": { "frequency": "weekly" },
            "priority": 2
        }))
        .expect("decode task");
        assert_eq!(task.recurrence, None);
        assert!(!task.is_repeating());
        assert_eq!(task.priority, 2);
        assert_eq!(task.undecoded_recurrence(), Some(&json!({ "frequency": "weekly" })));
    }

    #[test]
    fn malformed_recurrence_is_written_back_unchanged() {
        let raw = json!({ "frequency": "weekly", "interval": 2 });
        let task: Task = serde_json::from_value(json!({
            "id": "t4",
            "title": "Old",
            "recurrence": raw.clone()
        }))
        .expect("decode task");

        let encoded = serde_json::to_value(&task).expect("encode task");
        assert_eq!(encoded["recurrence"], raw);
        let again: Task = serde_json::from_value(encoded).expect("decode again");
        assert_eq!(again, task);
    }

    #[test]
    fn replacing_an_undecoded_schedule_drops_the_raw_value() {
        let mut task: Task = serde_json::from_value(json!({
            "id": "t5",
            "title": "Old",
            "recurrence": { "frequency": "fortnightly" }
        }))
        .expect("decode task");
        task.recurrence = Some(RecurrenceSettings::new(
            RecurrenceRule::Monthly,
            NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date"),
            None,
        ));
        assert_eq!(task.undecoded_recurrence(), None);

        let encoded = serde_json::to_string(&task).expect("encode task");
        assert_eq!(encoded.matches("\"recurrence\"").count(), 1);
        let again: Task = serde_json::from_str(&encoded).expect("decode again");
        assert!(matches!(
            again.recurrence.as_ref().map(|r| &r.rule),
            Some(RecurrenceRule::Monthly)
        ));
        assert!(again.extra.is_empty());
    }

    #[test]
    fn null_recurrence_is_absent() {
        let task: Task = serde_json::from_value(json!({
            "id": "t6",
            "title": "Plain",
            "recurrence": null
        }))
        .expect("decode task");
        assert_eq!(task.recurrence, None);
        assert!(task.extra.is_empty());
    }

    #[test]
    fn unknown_fields_survive_a_roundtrip() {
        let raw = json!({
            "id": "t2",
            "title": "Renew passport",
            "imageUri": "file:///tmp/passport.png",
            "recurrence": {
                "frequency": "yearly",
                "anchorDate": "2024-06-01"
            },
            "completedInstanceDates": ["2024-06-01"]
        });
        let task: Task = serde_json::from_value(raw).expect("decode task");
        assert!(task.is_repeating());
        assert!(matches!(
            task.recurrence.as_ref().map(|r| &r.rule),
            Some(RecurrenceRule::Yearly)
        ));

        let encoded = serde_json::to_value(&task).expect("encode task");
        assert_eq!(encoded["imageUri"], "file:///tmp/passport.png");
        assert_eq!(encoded["completedInstanceDates"], json!(["2024-06-01"]));
    }

    #[test]
    fn one_shot_schedule_is_not_active() {
        let task: Task = serde_json::from_value(json!({
            "id": "t3",
            "title": "Dentist",
            "recurrence": { "frequency": "none", "anchorDate": "2024-05-02" }
        }))
        .expect("decode task");
        assert!(task.recurrence.is_some());
        assert!(!task.is_repeating());
    }
}
