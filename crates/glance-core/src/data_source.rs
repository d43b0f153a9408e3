use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::WidgetError;
use crate::filter::Filter;
use crate::host::WidgetId;
use crate::render::{ColorPreferences, RowDescriptor, render};
use crate::resolver::FilterResolver;
use crate::service::{TaskCursor, TaskQueryService, WIDGET_PROJECTION};
use crate::task::TaskSnapshot;

#[derive(Default)]
struct CursorState {
    cursor: Option<Box<dyn TaskCursor>>,
    generation: u64,
    filter: Option<Filter>,
}

impl CursorState {
    fn count(&self) -> usize {
        self.cursor.as_ref().map(|cursor| cursor.count()).unwrap_or(0)
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.filter = None;
    }
}

/// The live cursor behind one widget instance.
///
/// Reopen, close and row reads are serialized on one mutex, so a reader
/// never observes a cursor that is being replaced.
pub struct ListDataSource {
    widget_id: WidgetId,
    resolver: Arc<FilterResolver>,
    service: Arc<dyn TaskQueryService>,
    state: Mutex<CursorState>,
}

impl ListDataSource {
    pub fn new(
        widget_id: WidgetId,
        resolver: Arc<FilterResolver>,
        service: Arc<dyn TaskQueryService>,
    ) -> Self {
        Self {
            widget_id,
            resolver,
            service,
            state: Mutex::new(CursorState::default()),
        }
    }

    pub fn widget_id(&self) -> WidgetId {
        self.widget_id
    }

    pub fn open(&self, now: DateTime<Utc>) -> Result<Filter, WidgetError> {
        self.refresh(now)
    }

    /// Closes the current cursor and opens one over the freshly resolved
    /// filter.
    #[tracing::instrument(skip(self, now), fields(widget_id = self.widget_id))]
    pub fn refresh(&self, now: DateTime<Utc>) -> Result<Filter, WidgetError> {
        let mut state = self.state.lock();
        state.close();

        let filter = self.resolver.resolve(self.widget_id, now);
        let query = self.resolver.effective_query(self.widget_id, &filter, now);
        debug!(query = %query, "opening cursor");

        let cursor = self
            .service
            .fetch_filtered(&query, &WIDGET_PROJECTION, now)
            .map_err(|err| WidgetError::from_collaborator(&err))?;

        state.generation += 1;
        state.cursor = Some(cursor);
        state.filter = Some(filter.clone());
        info!(
            count = state.count(),
            generation = state.generation,
            title = %filter.title,
            "cursor opened"
        );
        Ok(filter)
    }

    pub fn count(&self) -> usize {
        self.state.lock().count()
    }

    /// Filter backing the current cursor, if one is open.
    pub fn filter(&self) -> Option<Filter> {
        self.state.lock().filter.clone()
    }

    pub fn row_at(&self, position: usize) -> Result<TaskSnapshot, WidgetError> {
        let mut state = self.state.lock();
        let count = state.count();
        let cursor = match state.cursor.as_mut() {
            Some(cursor) if position < count => cursor,
            _ => return Err(WidgetError::OutOfRange { position, count }),
        };

        let row = cursor
            .row_at(position)
            .map_err(|err| WidgetError::from_collaborator(&err))?;
        TaskSnapshot::from_row(&row).map_err(|err| WidgetError::from_collaborator(&err))
    }

    pub fn stable_id_at(&self, position: usize) -> Result<i64, WidgetError> {
        self.row_at(position).map(|snapshot| snapshot.id)
    }

    /// The rendered row at `position`. Rows that cannot be read are
    /// skipped with `None`; positions outside the cursor are errors.
    pub fn view_at(
        &self,
        position: usize,
        colors: &ColorPreferences,
        now: DateTime<Utc>,
    ) -> Result<Option<RowDescriptor>, WidgetError> {
        match self.row_at(position) {
            Ok(snapshot) => Ok(Some(render(&snapshot, colors, now))),
            Err(err @ WidgetError::OutOfRange { .. }) => Err(err),
            Err(err) => {
                warn!(widget_id = self.widget_id, position, error = %err, "skipping unreadable row");
                Ok(None)
            }
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.cursor.is_some() {
            debug!(widget_id = self.widget_id, "closing cursor");
        }
        state.close();
    }

    /// Number of successful opens so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
