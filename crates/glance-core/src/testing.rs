//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::datastore::select_rows;
use crate::error::WidgetError;
use crate::host::{Intent, WidgetHost, WidgetId};
use crate::service::{Column, TaskCursor, TaskQueryService};
use crate::surface::SurfacePayload;
use crate::task::{Tag, TaskRecord, TaskSnapshot};

#[derive(Debug, Default)]
pub struct StubService {
    pub tags: Mutex<Vec<Tag>>,
    pub tasks: Mutex<Vec<TaskRecord>>,
    pub fail_tag_lookup: AtomicBool,
    pub unavailable: AtomicBool,
    pub fetches: AtomicUsize,
}

impl StubService {
    pub fn with_tag(self, id: i64, name: &str) -> Self {
        self.tags.lock().push(Tag {
            id,
            name: name.to_string(),
        });
        self
    }

    pub fn rename_tag(&self, id: i64, name: &str) {
        for tag in self.tags.lock().iter_mut().filter(|tag| tag.id == id) {
            tag.name = name.to_string();
        }
    }

    pub fn push_task(&self, task: TaskRecord) {
        self.tasks.lock().push(task);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TaskQueryService for StubService {
    fn fetch_filtered(
        &self,
        query: &str,
        projection: &[Column],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Box<dyn TaskCursor>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WidgetError::DataUnavailable {
                reason: "store not open".to_string(),
            }
            .into());
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let tasks = self.tasks.lock().clone();
        let tags = self.tags.lock().clone();
        Ok(Box::new(select_rows(query, tasks, &tags, projection, now)?))
    }

    fn tag_by_id(&self, id: i64) -> anyhow::Result<Option<Tag>> {
        if self.fail_tag_lookup.load(Ordering::SeqCst) {
            return Err(anyhow!("tag table locked"));
        }
        Ok(self.tags.lock().iter().find(|tag| tag.id == id).cloned())
    }

    fn tag_by_name(&self, name: &str) -> anyhow::Result<Option<Tag>> {
        if self.fail_tag_lookup.load(Ordering::SeqCst) {
            return Err(anyhow!("tag table locked"));
        }
        Ok(self.tags.lock().iter().find(|tag| tag.name == name).cloned())
    }

    fn fetch_task(&self, id: i64) -> anyhow::Result<Option<TaskSnapshot>> {
        Ok(self
            .tasks
            .lock()
            .iter()
            .find(|task| task.id == id)
            .map(TaskRecord::snapshot))
    }

    fn set_complete(&self, id: i64, completed: bool, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        task.completed = if completed { Some(now) } else { None };
        Ok(())
    }
}

/// Host recording every call; instances listed in `failing` reject
/// surface updates.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub ids: Mutex<Vec<WidgetId>>,
    pub failing: Mutex<Vec<WidgetId>>,
    pub surfaces: Mutex<Vec<SurfacePayload>>,
    pub notified: Mutex<Vec<WidgetId>>,
    pub timers: Mutex<Vec<(String, Duration)>>,
    pub launched: Mutex<Vec<Intent>>,
}

impl RecordingHost {
    pub fn with_ids(ids: &[WidgetId]) -> Self {
        let host = Self::default();
        *host.ids.lock() = ids.to_vec();
        host
    }
}

impl WidgetHost for RecordingHost {
    fn instance_ids(&self) -> anyhow::Result<Vec<WidgetId>> {
        Ok(self.ids.lock().clone())
    }

    fn update_surface(&self, payload: &SurfacePayload) -> anyhow::Result<()> {
        if self.failing.lock().contains(&payload.widget_id) {
            return Err(anyhow!("surface {} rejected", payload.widget_id));
        }
        self.surfaces.lock().push(payload.clone());
        Ok(())
    }

    fn notify_data_changed(&self, widget_id: WidgetId) -> anyhow::Result<()> {
        self.notified.lock().push(widget_id);
        Ok(())
    }

    fn set_repeating_timer(&self, name: &str, interval: Duration) -> anyhow::Result<()> {
        self.timers.lock().push((name.to_string(), interval));
        Ok(())
    }

    fn launch(&self, intent: &Intent) -> anyhow::Result<()> {
        self.launched.lock().push(intent.clone());
        Ok(())
    }
}
