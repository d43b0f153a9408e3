use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bundle::ValueBundle;
use crate::host::{
    EXTRA_OVERRIDE_FINISH_ANIM, EXTRA_TASK_ID, EXTRA_WIDGET_ID, HostAction, Intent, LaunchTarget,
    WidgetHost, WidgetId,
};
use crate::registry::WidgetRegistry;
use crate::scheduler::{RefreshOutcome, RefreshTrigger, UpdateScheduler};
use crate::service::TaskQueryService;

/// What handling one host action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Refresh(RefreshOutcome),
    Toggled { task_id: i64, completed: bool },
    Launched,
    Removed(WidgetId),
    Ignored,
}

/// Entry point for actions the host delivers to the widget.
pub struct WidgetProvider {
    scheduler: Arc<UpdateScheduler>,
    registry: Arc<WidgetRegistry>,
    service: Arc<dyn TaskQueryService>,
    host: Arc<dyn WidgetHost>,
    tablet_layout: bool,
}

impl WidgetProvider {
    pub fn new(
        scheduler: Arc<UpdateScheduler>,
        registry: Arc<WidgetRegistry>,
        service: Arc<dyn TaskQueryService>,
        host: Arc<dyn WidgetHost>,
        tablet_layout: bool,
    ) -> Self {
        Self {
            scheduler,
            registry,
            service,
            host,
            tablet_layout,
        }
    }

    #[tracing::instrument(skip(self, extras, now))]
    pub fn on_receive(
        &self,
        action: &str,
        extras: &ValueBundle,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ProviderOutcome> {
        match HostAction::parse(action) {
            HostAction::CompleteTask => {
                let task_id = task_id(extras)?;
                self.toggle_completion(task_id, now)
            }
            HostAction::EditTask => {
                self.open_for_edit(extras)?;
                Ok(ProviderOutcome::Launched)
            }
            HostAction::TaskListUpdated => Ok(ProviderOutcome::Refresh(
                self.scheduler
                    .request_refresh(RefreshTrigger::ExternalListChanged, now),
            )),
            HostAction::PeriodicUpdate => Ok(ProviderOutcome::Refresh(
                self.scheduler.request_refresh(RefreshTrigger::Periodic, now),
            )),
            HostAction::InstanceCreated => {
                let widget_id = widget_id(extras)
                    .ok_or_else(|| anyhow!("{action} requires a {EXTRA_WIDGET_ID} extra"))?;
                Ok(ProviderOutcome::Refresh(self.scheduler.request_refresh(
                    RefreshTrigger::Explicit(Some(widget_id)),
                    now,
                )))
            }
            HostAction::InstanceRemoved => {
                let widget_id = widget_id(extras)
                    .ok_or_else(|| anyhow!("{action} requires a {EXTRA_WIDGET_ID} extra"))?;
                self.registry.remove_instance(widget_id);
                Ok(ProviderOutcome::Removed(widget_id))
            }
            HostAction::ApplyConfig => Ok(ProviderOutcome::Refresh(self.scheduler.request_refresh(
                RefreshTrigger::Explicit(widget_id(extras)),
                now,
            ))),
            HostAction::Unknown(raw) => {
                debug!(action = %raw, "ignoring unknown action");
                Ok(ProviderOutcome::Ignored)
            }
        }
    }

    /// Flips completion of `task_id`, then refreshes like any other list
    /// change would.
    fn toggle_completion(&self, task_id: i64, now: DateTime<Utc>) -> anyhow::Result<ProviderOutcome> {
        let task = self
            .service
            .fetch_task(task_id)
            .with_context(|| format!("failed to load task {task_id}"))?
            .ok_or_else(|| anyhow!("task not found: {task_id}"))?;

        let completed = !task.is_completed();
        self.service
            .set_complete(task_id, completed, now)
            .with_context(|| format!("failed to update task {task_id}"))?;
        info!(task_id, completed, "toggled completion from widget");

        if let RefreshOutcome::Refreshed(report) = self
            .scheduler
            .request_refresh(RefreshTrigger::ExternalListChanged, now)
            && !report.is_clean()
        {
            warn!(failed = report.failed.len(), "some widgets did not refresh after toggle");
        }
        Ok(ProviderOutcome::Toggled { task_id, completed })
    }

    fn open_for_edit(&self, extras: &ValueBundle) -> anyhow::Result<()> {
        let target = if self.tablet_layout {
            LaunchTarget::TaskList
        } else {
            LaunchTarget::TaskEdit
        };
        let intent = Intent::new(target)
            .with_extras(extras)
            .with_extras(&ValueBundle::new().with(EXTRA_OVERRIDE_FINISH_ANIM, false));
        self.host.launch(&intent)
    }
}

fn task_id(extras: &ValueBundle) -> anyhow::Result<i64> {
    extras
        .get_int(EXTRA_TASK_ID)
        .ok_or_else(|| anyhow!("missing {EXTRA_TASK_ID} extra"))
}

fn widget_id(extras: &ValueBundle) -> Option<WidgetId> {
    extras
        .get_int(EXTRA_WIDGET_ID)
        .and_then(|id| WidgetId::try_from(id).ok())
}
