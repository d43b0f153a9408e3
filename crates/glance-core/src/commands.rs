use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::bundle::ValueBundle;
use crate::cli::{Command, TagCommand, TapKind, TriggerEvent};
use crate::config::{Config, WidgetSettings};
use crate::datastore::DataStore;
use crate::datetime::parse_date_expr;
use crate::filter::Filter;
use crate::host::{
    ACTION_APPLY_CONFIG, ACTION_COMPLETE_TASK, ACTION_EDIT_TASK, ACTION_TASK_LIST_UPDATED,
    ACTION_WIDGET_DELETED, ACTION_WIDGET_ENABLED, ACTION_WIDGET_UPDATE, EXTRA_OPEN_TASK,
    EXTRA_TASK_ID, EXTRA_WIDGET_ID, TerminalHost, WidgetHost, WidgetId,
};
use crate::prefs::{FilePreferences, PreferenceStore, WidgetKey};
use crate::provider::{ProviderOutcome, WidgetProvider};
use crate::registry::WidgetRegistry;
use crate::render::Renderer;
use crate::resolver::FilterResolver;
use crate::scheduler::{RefreshOutcome, RefreshTrigger, SuppressionState, UpdateScheduler};
use crate::service::TaskQueryService;
use crate::task::TaskRecord;

pub const PREFERENCES_FILE: &str = "prefs.json";

/// Everything one invocation needs to drive the widgets.
pub struct WidgetRuntime {
    pub host: Arc<TerminalHost>,
    pub prefs: Arc<dyn PreferenceStore>,
    pub registry: Arc<WidgetRegistry>,
    pub scheduler: Arc<UpdateScheduler>,
    pub provider: WidgetProvider,
}

impl WidgetRuntime {
    pub fn assemble(
        store: Arc<DataStore>,
        prefs: Arc<dyn PreferenceStore>,
        settings: &WidgetSettings,
    ) -> Self {
        let host = Arc::new(TerminalHost::new(settings.instances.clone()));
        let host_handle: Arc<dyn WidgetHost> = host.clone();
        let service: Arc<dyn TaskQueryService> = store;

        let resolver = Arc::new(FilterResolver::new(
            prefs.clone(),
            service.clone(),
            &settings.default_title,
        ));
        let registry = Arc::new(WidgetRegistry::new(
            host_handle.clone(),
            service.clone(),
            prefs.clone(),
            resolver,
            settings.surface,
        ));
        let scheduler = Arc::new(UpdateScheduler::new(
            registry.clone(),
            host_handle.clone(),
            Arc::new(SuppressionState::new()),
            settings.scheduler,
        ));
        let provider = WidgetProvider::new(
            scheduler.clone(),
            registry.clone(),
            service,
            host_handle,
            settings.surface.tablet_layout,
        );

        Self {
            host,
            prefs,
            registry,
            scheduler,
            provider,
        }
    }
}

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: Arc<DataStore>,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let settings = WidgetSettings::from_config(cfg).context("invalid widget configuration")?;
    let prefs_path = store.data_dir.join(PREFERENCES_FILE);
    let prefs: Arc<dyn PreferenceStore> = Arc::new(
        FilePreferences::open(&prefs_path)
            .with_context(|| format!("failed to open {}", prefs_path.display()))?,
    );
    let runtime = WidgetRuntime::assemble(store.clone(), prefs, &settings);

    debug!(?command, instances = ?settings.instances, "dispatching command");

    match command {
        Command::Render { widget } => cmd_render(&runtime, renderer, widget, now),
        Command::Trigger { event, widget } => cmd_trigger(&runtime, renderer, event, widget, now),
        Command::Tap {
            kind,
            task_id,
            widget,
        } => cmd_tap(&runtime, renderer, &settings, kind, task_id, widget, now),
        Command::Add {
            title,
            due,
            importance,
            tags,
            repeat,
        } => cmd_add(
            &store,
            &runtime,
            renderer,
            AddArgs {
                title: title.join(" "),
                due,
                importance,
                tags,
                repeat,
            },
            now,
        ),
        Command::Tag { action } => cmd_tag(&store, &runtime, renderer, action, now),
        Command::Configure { widget, tag, reset } => {
            cmd_configure(&store, &runtime, renderer, widget, tag, reset, now)
        }
        Command::Show => cmd_show(cfg),
    }
}

#[instrument(skip(runtime, renderer, now))]
fn cmd_render(
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    widget: Option<WidgetId>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command render");
    let outcome = runtime
        .scheduler
        .request_refresh(RefreshTrigger::Explicit(widget), now);
    report_refresh(&outcome);
    print_widgets(runtime, renderer, now)
}

#[instrument(skip(runtime, renderer, now))]
fn cmd_trigger(
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    event: TriggerEvent,
    widget: Option<WidgetId>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command trigger");
    let action = match event {
        TriggerEvent::Periodic => ACTION_WIDGET_UPDATE,
        TriggerEvent::ListChanged => ACTION_TASK_LIST_UPDATED,
        TriggerEvent::Enabled => ACTION_WIDGET_ENABLED,
        TriggerEvent::Deleted => ACTION_WIDGET_DELETED,
    };

    let mut extras = ValueBundle::new();
    if let Some(widget_id) = widget {
        extras.insert(EXTRA_WIDGET_ID, i64::from(widget_id));
    }

    match runtime.provider.on_receive(action, &extras, now)? {
        ProviderOutcome::Refresh(outcome) => report_refresh(&outcome),
        ProviderOutcome::Removed(widget_id) => println!("Removed widget {widget_id}."),
        other => debug!(?other, "trigger handled"),
    }
    print_widgets(runtime, renderer, now)
}

#[instrument(skip(runtime, renderer, settings, now))]
fn cmd_tap(
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    settings: &WidgetSettings,
    kind: TapKind,
    task_id: i64,
    widget: Option<WidgetId>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command tap");
    let widget_id = widget
        .or_else(|| settings.instances.first().copied())
        .ok_or_else(|| anyhow!("no widget instances configured"))?;

    // Rows only carry ids of tasks their widget can currently show.
    let source = runtime.registry.data_source(widget_id);
    source
        .open(now)
        .map_err(|err| anyhow!("widget {widget_id} cannot load its list: {err}"))?;
    let visible = (0..source.count()).any(|pos| source.stable_id_at(pos) == Ok(task_id));
    if !visible {
        return Err(anyhow!("task {task_id} is not shown by widget {widget_id}"));
    }

    let (action, extras) = match kind {
        TapKind::Complete => (
            ACTION_COMPLETE_TASK,
            ValueBundle::new().with(EXTRA_TASK_ID, task_id),
        ),
        TapKind::Edit => (
            ACTION_EDIT_TASK,
            ValueBundle::new()
                .with(EXTRA_TASK_ID, task_id)
                .with(EXTRA_OPEN_TASK, task_id),
        ),
    };
    let extras = extras.with(EXTRA_WIDGET_ID, i64::from(widget_id));

    match runtime.provider.on_receive(action, &extras, now)? {
        ProviderOutcome::Toggled { task_id, completed } => {
            let verb = if completed { "Completed" } else { "Reopened" };
            println!("{verb} task {task_id}.");
            print_widgets(runtime, renderer, now)
        }
        ProviderOutcome::Launched => {
            for intent in runtime.host.launched() {
                renderer.print_launch(&intent)?;
            }
            Ok(())
        }
        other => {
            debug!(?other, "tap handled");
            Ok(())
        }
    }
}

struct AddArgs {
    title: String,
    due: Option<String>,
    importance: Option<i64>,
    tags: Vec<String>,
    repeat: Option<String>,
}

#[instrument(skip(store, runtime, renderer, args, now))]
fn cmd_add(
    store: &DataStore,
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    args: AddArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let title = args.title.trim().to_string();
    if title.is_empty() {
        return Err(anyhow!("task title cannot be empty"));
    }

    let mut task = TaskRecord::new(0, title, now);
    if let Some(raw) = args.due.as_deref() {
        task.due = Some(parse_date_expr(raw, now).with_context(|| format!("invalid due date: {raw}"))?);
    }
    if let Some(importance) = args.importance {
        task.importance = importance;
    }
    task.recurrence = args.repeat.filter(|rule| !rule.trim().is_empty());
    for name in &args.tags {
        let tag = store.add_tag(name)?;
        if !task.tags.contains(&tag.id) {
            task.tags.push(tag.id);
        }
    }

    let id = store.add_task(task)?;
    println!("Created task {id}.");

    notify_list_changed(runtime, now)?;
    print_widgets(runtime, renderer, now)
}

#[instrument(skip(store, runtime, renderer, now))]
fn cmd_tag(
    store: &DataStore,
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    action: TagCommand,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    match action {
        TagCommand::Add { name } => {
            let tag = store.add_tag(&name)?;
            println!("Tag {} is {}.", tag.name, tag.id);
            Ok(())
        }
        TagCommand::Rename { old, new } => {
            let tag = store.rename_tag(&old, &new)?;
            println!("Renamed tag {} to {}.", tag.id, tag.name);
            notify_list_changed(runtime, now)?;
            print_widgets(runtime, renderer, now)
        }
        TagCommand::List => {
            for tag in store.load_tags()? {
                println!("{} {}", tag.id, tag.name);
            }
            Ok(())
        }
    }
}

#[instrument(skip(store, runtime, renderer, now))]
fn cmd_configure(
    store: &DataStore,
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    widget_id: WidgetId,
    tag: Option<String>,
    reset: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command configure");
    let resolver = runtime.registry.resolver();

    if reset {
        resolver.forget(widget_id)?;
        println!("Widget {widget_id} shows the default list.");
    } else if let Some(name) = tag {
        let tag = store
            .tag_by_name(&name)?
            .ok_or_else(|| anyhow!("no tag named {name}"))?;
        resolver.persist(widget_id, &Filter::from_tag(&tag))?;
        runtime
            .prefs
            .set_long(&WidgetKey::TagId.for_widget(widget_id), tag.id)?;
        println!("Widget {widget_id} shows tag {}.", tag.name);
    }

    let extras = ValueBundle::new().with(EXTRA_WIDGET_ID, i64::from(widget_id));
    if let ProviderOutcome::Refresh(outcome) =
        runtime.provider.on_receive(ACTION_APPLY_CONFIG, &extras, now)?
    {
        report_refresh(&outcome);
    }
    print_widgets(runtime, renderer, now)
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn notify_list_changed(runtime: &WidgetRuntime, now: DateTime<Utc>) -> anyhow::Result<()> {
    if let ProviderOutcome::Refresh(outcome) =
        runtime
            .provider
            .on_receive(ACTION_TASK_LIST_UPDATED, &ValueBundle::new(), now)?
    {
        report_refresh(&outcome);
    }
    Ok(())
}

fn report_refresh(outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Suppressed => println!("Refresh suppressed."),
        RefreshOutcome::Refreshed(report) => {
            for err in &report.failed {
                warn!(error = %err, "widget refresh failed");
                eprintln!("{err}");
            }
        }
    }
}

/// Prints every surface the host received, with the rows it would pull.
fn print_widgets(
    runtime: &WidgetRuntime,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let colors = runtime.registry.colors();
    for surface in runtime.host.surfaces() {
        let source = runtime.registry.data_source(surface.widget_id);
        let mut rows = Vec::with_capacity(source.count());
        let mut dues = Vec::with_capacity(source.count());
        for position in 0..source.count() {
            let Some(row) = source.view_at(position, &colors, now)? else {
                continue;
            };
            dues.push(source.row_at(position).ok().and_then(|snapshot| snapshot.due));
            rows.push(row);
        }
        renderer.print_widget(&surface, &rows, &dues)?;
    }
    Ok(())
}
