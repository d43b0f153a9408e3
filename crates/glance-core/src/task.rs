use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of importance levels the checkbox icon sets define. Level `0` is
/// the most important one.
pub const IMPORTANCE_LEVELS: usize = 4;

/// Importance given to new tasks when nothing else is specified.
pub const IMPORTANCE_NONE: i64 = 3;

/// A task as stored by the reference [`DataStore`](crate::datastore::DataStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,

    pub title: String,

    pub created: DateTime<Utc>,

    pub modified: DateTime<Utc>,

    #[serde(default)]
    pub due: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,

    #[serde(default = "default_importance")]
    pub importance: i64,

    #[serde(default)]
    pub recurrence: Option<String>,

    /// Ids of the tags the task belongs to.
    #[serde(default)]
    pub tags: Vec<i64>,
}

fn default_importance() -> i64 {
    IMPORTANCE_NONE
}

impl TaskRecord {
    pub fn new(id: i64, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            created: now,
            modified: now,
            due: None,
            completed: None,
            deleted: None,
            importance: IMPORTANCE_NONE,
            recurrence: None,
            tags: vec![],
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due.map(|due| due < now).unwrap_or(false)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            title: self.title.clone(),
            due: self.due,
            completed: self.completed,
            importance: self.importance,
            recurrence: self.recurrence.clone(),
        }
    }
}

/// Read-only projection of one task, materialized from a cursor row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: i64,
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub importance: i64,
    pub recurrence: Option<String>,
}

impl TaskSnapshot {
    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due.map(|due| due < now).unwrap_or(false)
    }

    pub fn is_repeating(&self) -> bool {
        self.recurrence
            .as_deref()
            .map(|rule| !rule.trim().is_empty())
            .unwrap_or(false)
    }

    /// Importance as an index into an icon set of `IMPORTANCE_LEVELS`.
    pub fn importance_index(&self) -> usize {
        usize::try_from(self.importance.max(0))
            .unwrap_or(usize::MAX)
            .min(IMPORTANCE_LEVELS - 1)
    }
}

/// A source collection tasks can be grouped by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{IMPORTANCE_LEVELS, TaskRecord};

    #[test]
    fn importance_index_is_clamped_to_the_icon_set() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut task = TaskRecord::new(1, "clamp".to_string(), now);

        task.importance = 17;
        assert_eq!(task.snapshot().importance_index(), IMPORTANCE_LEVELS - 1);

        task.importance = -2;
        assert_eq!(task.snapshot().importance_index(), 0);

        task.importance = 1;
        assert_eq!(task.snapshot().importance_index(), 1);
    }

    #[test]
    fn overdue_needs_a_past_due_date() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut task = TaskRecord::new(1, "due".to_string(), now);
        assert!(!task.is_overdue(now));

        task.due = Some(now - Duration::minutes(1));
        assert!(task.is_overdue(now));

        task.due = Some(now + Duration::days(1));
        assert!(!task.is_overdue(now));
    }

    #[test]
    fn blank_recurrence_is_not_repeating() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut task = TaskRecord::new(1, "repeat".to_string(), now);
        task.recurrence = Some("  ".to_string());
        assert!(!task.snapshot().is_repeating());

        task.recurrence = Some("FREQ=WEEKLY".to_string());
        assert!(task.snapshot().is_repeating());
    }
}
