//! Task store collaborator: filtered cursors, tag lookups and completion
//! mutation.

use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use crate::task::{Tag, TaskSnapshot};

/// Columns a cursor can project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Id,
    Title,
    DueDate,
    CompletionDate,
    Importance,
    Recurrence,
}

/// Projection every widget cursor is opened with.
pub const WIDGET_PROJECTION: [Column; 6] = [
    Column::Id,
    Column::Title,
    Column::DueDate,
    Column::CompletionDate,
    Column::Importance,
    Column::Recurrence,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// One cursor row, holding only the projected columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: BTreeMap<Column, ColumnValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: Column, value: ColumnValue) -> Self {
        self.values.insert(column, value);
        self
    }

    pub fn get(&self, column: Column) -> Option<&ColumnValue> {
        self.values.get(&column)
    }

    fn int(&self, column: Column) -> anyhow::Result<i64> {
        match self.get(column) {
            Some(ColumnValue::Int(value)) => Ok(*value),
            other => Err(anyhow!("column {column:?} is not an integer: {other:?}")),
        }
    }

    fn timestamp(&self, column: Column) -> anyhow::Result<Option<DateTime<Utc>>> {
        match self.get(column) {
            Some(ColumnValue::Timestamp(value)) => Ok(Some(*value)),
            Some(ColumnValue::Null) | None => Ok(None),
            other => Err(anyhow!("column {column:?} is not a timestamp: {other:?}")),
        }
    }

    fn text(&self, column: Column) -> anyhow::Result<Option<String>> {
        match self.get(column) {
            Some(ColumnValue::Text(value)) => Ok(Some(value.clone())),
            Some(ColumnValue::Null) | None => Ok(None),
            other => Err(anyhow!("column {column:?} is not text: {other:?}")),
        }
    }

    /// Builds a row carrying the requested columns of `snapshot`.
    pub fn project(snapshot: &TaskSnapshot, projection: &[Column]) -> Self {
        let mut row = Row::new();
        for column in projection {
            let value = match column {
                Column::Id => ColumnValue::Int(snapshot.id),
                Column::Title => ColumnValue::Text(snapshot.title.clone()),
                Column::DueDate => snapshot
                    .due
                    .map(ColumnValue::Timestamp)
                    .unwrap_or(ColumnValue::Null),
                Column::CompletionDate => snapshot
                    .completed
                    .map(ColumnValue::Timestamp)
                    .unwrap_or(ColumnValue::Null),
                Column::Importance => ColumnValue::Int(snapshot.importance),
                Column::Recurrence => snapshot
                    .recurrence
                    .clone()
                    .map(ColumnValue::Text)
                    .unwrap_or(ColumnValue::Null),
            };
            row.values.insert(*column, value);
        }
        row
    }
}

impl TaskSnapshot {
    /// Materializes a snapshot from a row of [`WIDGET_PROJECTION`].
    pub fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.int(Column::Id)?,
            title: row.text(Column::Title)?.unwrap_or_default(),
            due: row.timestamp(Column::DueDate)?,
            completed: row.timestamp(Column::CompletionDate)?,
            importance: row.int(Column::Importance)?,
            recurrence: row.text(Column::Recurrence)?,
        })
    }
}

/// A positioned view over the result of one query execution.
pub trait TaskCursor: Send {
    fn count(&self) -> usize;

    /// Moves to `position` and returns that row.
    fn row_at(&mut self, position: usize) -> anyhow::Result<Row>;

    fn close(&mut self);
}

/// Cursor over rows already fetched into memory.
#[derive(Debug, Default)]
pub struct VecCursor {
    rows: Vec<Row>,
    closed: bool,
}

impl VecCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            closed: false,
        }
    }
}

impl TaskCursor for VecCursor {
    fn count(&self) -> usize {
        if self.closed { 0 } else { self.rows.len() }
    }

    fn row_at(&mut self, position: usize) -> anyhow::Result<Row> {
        if self.closed {
            return Err(anyhow!("cursor is closed"));
        }
        self.rows
            .get(position)
            .cloned()
            .ok_or_else(|| anyhow!("cursor has no row {position}"))
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}

/// Executes queries and point operations against the task store.
pub trait TaskQueryService: Send + Sync {
    /// Runs `query` and returns a cursor over `projection`.
    fn fetch_filtered(
        &self,
        query: &str,
        projection: &[Column],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Box<dyn TaskCursor>>;

    fn tag_by_id(&self, id: i64) -> anyhow::Result<Option<Tag>>;

    fn tag_by_name(&self, name: &str) -> anyhow::Result<Option<Tag>>;

    fn fetch_task(&self, id: i64) -> anyhow::Result<Option<TaskSnapshot>>;

    fn set_complete(&self, id: i64, completed: bool, now: DateTime<Utc>) -> anyhow::Result<()>;
}
