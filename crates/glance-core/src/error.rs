//! Error taxonomy of the refresh pipeline.
//!
//! Collaborators (task store, preferences, host) report failures as
//! `anyhow::Error`. The pipeline converts them into [`WidgetError`] at the
//! point where a caller needs to tell the kinds apart.

use crate::host::WidgetId;

/// Errors surfaced by the widget refresh pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WidgetError {
    /// The task store cannot serve reads yet (opened too early, locked, ...).
    #[error("task data unavailable: {reason}")]
    DataUnavailable {
        /// What the store reported.
        reason: String,
    },

    /// Looking up the source collection of a widget failed.
    #[error("source collection {tag_id} lookup failed: {reason}")]
    DriftRepair { tag_id: i64, reason: String },

    /// A row outside `[0, count)` was requested.
    #[error("row {position} out of range (count {count})")]
    OutOfRange { position: usize, count: usize },

    /// Refreshing one widget instance failed.
    #[error("refresh of widget {widget_id} failed: {reason}")]
    InstanceRefresh { widget_id: WidgetId, reason: String },

    /// Query execution or row decoding failed.
    #[error("query failed: {reason}")]
    Query { reason: String },
}

impl WidgetError {
    /// Maps a collaborator failure, keeping `DataUnavailable` recognizable
    /// even when it was wrapped in context by the collaborator.
    pub fn from_collaborator(err: &anyhow::Error) -> Self {
        if let Some(inner) = err.downcast_ref::<WidgetError>() {
            return inner.clone();
        }
        Self::Query {
            reason: format!("{err:#}"),
        }
    }

    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::DataUnavailable { .. })
    }
}
