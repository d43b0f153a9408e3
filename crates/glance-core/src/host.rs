//! The host shell boundary: what the widget pipeline asks of the process
//! that owns the home screen, and the actions that process sends back.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bundle::ValueBundle;
use crate::surface::SurfacePayload;

/// Instance id assigned by the host.
pub type WidgetId = i32;

pub const ACTION_COMPLETE_TASK: &str = "COMPLETE_TASK";
pub const ACTION_EDIT_TASK: &str = "EDIT_TASK";
pub const ACTION_TASK_LIST_UPDATED: &str = "glance.TASK_LIST_UPDATED";
pub const ACTION_WIDGET_UPDATE: &str = "glance.APPWIDGET_UPDATE";
pub const ACTION_WIDGET_ENABLED: &str = "glance.APPWIDGET_ENABLED";
pub const ACTION_WIDGET_DELETED: &str = "glance.APPWIDGET_DELETED";
pub const ACTION_APPLY_CONFIG: &str = "glance.APPLY_CONFIG";

pub const EXTRA_TASK_ID: &str = "task_id";
pub const EXTRA_OPEN_TASK: &str = "open_task";
pub const EXTRA_WIDGET_ID: &str = "widget_id";
pub const EXTRA_FILTER_QUERY: &str = "filter_query";
pub const EXTRA_FILTER_TITLE: &str = "filter_title";
pub const EXTRA_NEW_ITEM_VALUES: &str = "new_item_values";
pub const EXTRA_OVERRIDE_FINISH_ANIM: &str = "override_finish_anim";

/// An action string received from the host, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    CompleteTask,
    EditTask,
    TaskListUpdated,
    PeriodicUpdate,
    InstanceCreated,
    InstanceRemoved,
    ApplyConfig,
    Unknown(String),
}

impl HostAction {
    pub fn parse(raw: &str) -> Self {
        match raw {
            ACTION_COMPLETE_TASK => Self::CompleteTask,
            ACTION_EDIT_TASK => Self::EditTask,
            ACTION_TASK_LIST_UPDATED => Self::TaskListUpdated,
            ACTION_WIDGET_UPDATE => Self::PeriodicUpdate,
            ACTION_WIDGET_ENABLED => Self::InstanceCreated,
            ACTION_WIDGET_DELETED => Self::InstanceRemoved,
            ACTION_APPLY_CONFIG => Self::ApplyConfig,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CompleteTask => ACTION_COMPLETE_TASK,
            Self::EditTask => ACTION_EDIT_TASK,
            Self::TaskListUpdated => ACTION_TASK_LIST_UPDATED,
            Self::PeriodicUpdate => ACTION_WIDGET_UPDATE,
            Self::InstanceCreated => ACTION_WIDGET_ENABLED,
            Self::InstanceRemoved => ACTION_WIDGET_DELETED,
            Self::ApplyConfig => ACTION_APPLY_CONFIG,
            Self::Unknown(raw) => raw.as_str(),
        }
    }
}

/// Screen (or receiver) an [`Intent`] is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Broadcast back to the widget provider.
    Provider,
    TaskList,
    TaskEdit,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub target: LaunchTarget,
    pub action: Option<String>,
    pub extras: ValueBundle,
}

impl Intent {
    pub fn new(target: LaunchTarget) -> Self {
        Self {
            target,
            action: None,
            extras: ValueBundle::new(),
        }
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_extras(mut self, extras: &ValueBundle) -> Self {
        self.extras.merge(extras);
        self
    }

    /// A template completed with per-row extras, the way a host fills a
    /// pending click template in.
    pub fn fill_in(&self, extras: &ValueBundle) -> Self {
        self.clone().with_extras(extras)
    }
}

/// Operations the host shell exposes to the pipeline.
pub trait WidgetHost: Send + Sync {
    /// Ids of every live widget instance.
    fn instance_ids(&self) -> anyhow::Result<Vec<WidgetId>>;

    fn update_surface(&self, payload: &SurfacePayload) -> anyhow::Result<()>;

    /// Tells the host to re-pull the rows of `widget_id`.
    fn notify_data_changed(&self, widget_id: WidgetId) -> anyhow::Result<()>;

    /// Registers a repeating timer; registering the same `name` again
    /// replaces the previous one.
    fn set_repeating_timer(&self, name: &str, interval: Duration) -> anyhow::Result<()>;

    fn launch(&self, intent: &Intent) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct TerminalState {
    surfaces: Vec<SurfacePayload>,
    notified: Vec<WidgetId>,
    timers: Vec<(String, Duration)>,
    launched: Vec<Intent>,
}

/// Host used by the command line: a fixed set of instances, with every
/// request recorded so the caller can print it afterwards.
#[derive(Debug)]
pub struct TerminalHost {
    ids: Vec<WidgetId>,
    state: Mutex<TerminalState>,
}

impl TerminalHost {
    pub fn new(ids: Vec<WidgetId>) -> Self {
        Self {
            ids,
            state: Mutex::new(TerminalState::default()),
        }
    }

    /// Latest surface pushed for each instance, in push order.
    pub fn surfaces(&self) -> Vec<SurfacePayload> {
        let state = self.state.lock();
        let mut latest: Vec<SurfacePayload> = Vec::new();
        for payload in &state.surfaces {
            latest.retain(|seen| seen.widget_id != payload.widget_id);
            latest.push(payload.clone());
        }
        latest
    }

    pub fn notified(&self) -> Vec<WidgetId> {
        self.state.lock().notified.clone()
    }

    pub fn timers(&self) -> Vec<(String, Duration)> {
        self.state.lock().timers.clone()
    }

    pub fn launched(&self) -> Vec<Intent> {
        self.state.lock().launched.clone()
    }
}

impl WidgetHost for TerminalHost {
    fn instance_ids(&self) -> anyhow::Result<Vec<WidgetId>> {
        Ok(self.ids.clone())
    }

    fn update_surface(&self, payload: &SurfacePayload) -> anyhow::Result<()> {
        debug!(widget_id = payload.widget_id, title = %payload.title, "surface updated");
        self.state.lock().surfaces.push(payload.clone());
        Ok(())
    }

    fn notify_data_changed(&self, widget_id: WidgetId) -> anyhow::Result<()> {
        debug!(widget_id, "data changed");
        self.state.lock().notified.push(widget_id);
        Ok(())
    }

    fn set_repeating_timer(&self, name: &str, interval: Duration) -> anyhow::Result<()> {
        info!(timer = name, secs = interval.as_secs(), "repeating timer registered");
        let mut state = self.state.lock();
        state.timers.retain(|(existing, _)| existing != name);
        state.timers.push((name.to_string(), interval));
        Ok(())
    }

    fn launch(&self, intent: &Intent) -> anyhow::Result<()> {
        info!(launch_target = ?intent.target, action = ?intent.action, "launch requested");
        self.state.lock().launched.push(intent.clone());
        Ok(())
    }
}
