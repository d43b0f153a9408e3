use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::WidgetError;
use crate::query::{EvalContext, Query};
use crate::service::{Column, Row, TaskCursor, TaskQueryService, VecCursor};
use crate::task::{Tag, TaskRecord, TaskSnapshot};

/// JSON-lines task and tag store rooted at a data directory.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub tags_path: PathBuf,
    // Serializes read-modify-write cycles within one process.
    write_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let tags_path = data_dir.join("tags.data");

        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }
        if !tags_path.exists() {
            fs::write(&tags_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            tags = %tags_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            tags_path,
            write_lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<TaskRecord>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tags(&self) -> anyhow::Result<Vec<Tag>> {
        load_jsonl(&self.tags_path).context("failed to load tags.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[TaskRecord]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self, tags))]
    pub fn save_tags(&self, tags: &[Tag]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tags_path, tags).context("failed to save tags.data")
    }

    pub fn next_task_id(tasks: &[TaskRecord]) -> i64 {
        tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    pub fn next_tag_id(tags: &[Tag]) -> i64 {
        tags.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    /// Stores `task` under the next free id and returns that id.
    #[tracing::instrument(skip(self, task), fields(title = %task.title))]
    pub fn add_task(&self, mut task: TaskRecord) -> anyhow::Result<i64> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        task.id = Self::next_task_id(&tasks);
        let id = task.id;
        tasks.push(task);
        tasks.sort_by_key(|t| t.id);
        self.save_tasks(&tasks)?;
        info!(id, "added task");
        Ok(id)
    }

    /// Returns the tag called `name`, creating it first if needed.
    #[tracing::instrument(skip(self))]
    pub fn add_tag(&self, name: &str) -> anyhow::Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("tag name cannot be empty"));
        }

        let _guard = self.write_lock.lock();
        let mut tags = self.load_tags()?;
        if let Some(existing) = tags.iter().find(|tag| tag.name == name) {
            debug!(id = existing.id, "tag already exists");
            return Ok(existing.clone());
        }

        let tag = Tag {
            id: Self::next_tag_id(&tags),
            name: name.to_string(),
        };
        tags.push(tag.clone());
        self.save_tags(&tags)?;
        info!(id = tag.id, name = %tag.name, "added tag");
        Ok(tag)
    }

    #[tracing::instrument(skip(self))]
    pub fn rename_tag(&self, old: &str, new: &str) -> anyhow::Result<Tag> {
        let new = new.trim();
        if new.is_empty() {
            return Err(anyhow!("tag name cannot be empty"));
        }

        let _guard = self.write_lock.lock();
        let mut tags = self.load_tags()?;
        if tags.iter().any(|tag| tag.name == new) {
            return Err(anyhow!("a tag named {new} already exists"));
        }
        let tag = tags
            .iter_mut()
            .find(|tag| tag.name == old)
            .ok_or_else(|| anyhow!("no tag named {old}"))?;
        tag.name = new.to_string();
        let renamed = tag.clone();
        self.save_tags(&tags)?;
        info!(id = renamed.id, from = old, to = new, "renamed tag");
        Ok(renamed)
    }

    fn with_task<F>(&self, id: i64, now: DateTime<Utc>, edit: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        edit(task);
        task.modified = now;
        self.save_tasks(&tasks)
    }
}

/// Runs `query` over `tasks` and projects the matching rows.
#[tracing::instrument(skip(tasks, tags, projection, now), fields(count = tasks.len()))]
pub fn select_rows(
    query: &str,
    mut tasks: Vec<TaskRecord>,
    tags: &[Tag],
    projection: &[Column],
    now: DateTime<Utc>,
) -> anyhow::Result<VecCursor> {
    let parsed = Query::parse(query, now)?;
    let ctx = EvalContext { now, tags };

    tasks.retain(|task| parsed.matches(task, ctx));
    parsed.sort(&mut tasks);
    if let Some(limit) = parsed.limit {
        tasks.truncate(limit);
    }

    debug!(matched = tasks.len(), "selected rows");
    Ok(VecCursor::new(
        tasks
            .iter()
            .map(|task| Row::project(&task.snapshot(), projection))
            .collect(),
    ))
}

impl TaskQueryService for DataStore {
    fn fetch_filtered(
        &self,
        query: &str,
        projection: &[Column],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Box<dyn TaskCursor>> {
        let tasks = self.load_tasks().map_err(unavailable)?;
        let tags = self.load_tags().map_err(unavailable)?;
        let cursor = select_rows(query, tasks, &tags, projection, now)
            .with_context(|| format!("query failed: {query}"))?;
        Ok(Box::new(cursor))
    }

    fn tag_by_id(&self, id: i64) -> anyhow::Result<Option<Tag>> {
        Ok(self.load_tags()?.into_iter().find(|tag| tag.id == id))
    }

    fn tag_by_name(&self, name: &str) -> anyhow::Result<Option<Tag>> {
        Ok(self.load_tags()?.into_iter().find(|tag| tag.name == name))
    }

    fn fetch_task(&self, id: i64) -> anyhow::Result<Option<TaskSnapshot>> {
        Ok(self
            .load_tasks()?
            .iter()
            .find(|task| task.id == id)
            .map(TaskRecord::snapshot))
    }

    #[tracing::instrument(skip(self, now))]
    fn set_complete(&self, id: i64, completed: bool, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.with_task(id, now, |task| {
            task.completed = if completed { Some(now) } else { None };
        })
    }
}

fn unavailable(err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(WidgetError::DataUnavailable {
        reason: format!("{err:#}"),
    })
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(item);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, items))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, items: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for item in items {
        let serialized = serde_json::to_string(item)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
