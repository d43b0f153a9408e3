//! Decides when widgets may refresh.
//!
//! A refresh can be suppressed for a short window (for example while the
//! app itself is busy rewriting the list). Any trigger arriving inside the
//! window is dropped; the first one after it clears the suppression and
//! runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::host::{WidgetHost, WidgetId};
use crate::registry::{RefreshReport, WidgetRegistry};

/// Name of the periodic refresh timer registered with the host.
pub const UPDATE_TIMER_NAME: &str = "glance.widget.update";

pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_SUPPRESS_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Default)]
pub struct SuppressionState {
    suppressed_at: Mutex<Option<DateTime<Utc>>>,
}

impl SuppressionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress(&self, now: DateTime<Utc>) {
        *self.suppressed_at.lock() = Some(now);
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        within(*self.suppressed_at.lock(), now, window)
    }

    /// Returns `false` while suppressed. Otherwise clears the suppression
    /// and returns `true`; both happen under one lock.
    pub fn try_clear(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let mut suppressed_at = self.suppressed_at.lock();
        if within(*suppressed_at, now, window) {
            return false;
        }
        *suppressed_at = None;
        true
    }
}

fn within(suppressed_at: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    suppressed_at
        .map(|at| now.signed_duration_since(at) < window)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Periodic,
    ExternalListChanged,
    /// Configuration applied to one instance, or to all of them.
    Explicit(Option<WidgetId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Suppressed,
    Refreshed(RefreshReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub update_interval: StdDuration,
    pub suppress_window: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            update_interval: StdDuration::from_secs(DEFAULT_UPDATE_INTERVAL_MINUTES * 60),
            suppress_window: Duration::minutes(DEFAULT_SUPPRESS_WINDOW_MINUTES),
        }
    }
}

pub struct UpdateScheduler {
    registry: Arc<WidgetRegistry>,
    host: Arc<dyn WidgetHost>,
    suppression: Arc<SuppressionState>,
    settings: SchedulerSettings,
    activated: AtomicBool,
}

impl UpdateScheduler {
    pub fn new(
        registry: Arc<WidgetRegistry>,
        host: Arc<dyn WidgetHost>,
        suppression: Arc<SuppressionState>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            host,
            suppression,
            settings,
            activated: AtomicBool::new(false),
        }
    }

    pub fn suppression(&self) -> &Arc<SuppressionState> {
        &self.suppression
    }

    /// Registers (or replaces) the periodic timer.
    pub fn activate(&self) -> anyhow::Result<()> {
        self.host
            .set_repeating_timer(UPDATE_TIMER_NAME, self.settings.update_interval)?;
        self.activated.store(true, Ordering::SeqCst);
        info!(
            timer = UPDATE_TIMER_NAME,
            interval_secs = self.settings.update_interval.as_secs(),
            "periodic widget refresh scheduled"
        );
        Ok(())
    }

    fn ensure_active(&self) {
        if self
            .activated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Err(err) = self.activate() {
            self.activated.store(false, Ordering::SeqCst);
            warn!(error = %err, "failed to schedule periodic widget refresh");
        }
    }

    pub fn suppress(&self, now: DateTime<Utc>) {
        debug!(%now, "widget refresh suppressed");
        self.suppression.suppress(now);
    }

    #[tracing::instrument(skip(self, now))]
    pub fn request_refresh(&self, trigger: RefreshTrigger, now: DateTime<Utc>) -> RefreshOutcome {
        self.ensure_active();

        if !self.suppression.try_clear(now, self.settings.suppress_window) {
            debug!("refresh dropped inside suppression window");
            return RefreshOutcome::Suppressed;
        }

        let report = match trigger {
            RefreshTrigger::Explicit(Some(widget_id)) => self.registry.refresh_only(widget_id, now),
            RefreshTrigger::Periodic
            | RefreshTrigger::ExternalListChanged
            | RefreshTrigger::Explicit(None) => self.registry.refresh_all(now),
        };
        RefreshOutcome::Refreshed(report)
    }
}
