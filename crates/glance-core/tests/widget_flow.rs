use std::fs;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use glance_core::datastore::DataStore;
use glance_core::error::WidgetError;
use glance_core::filter::INBOX_QUERY;
use glance_core::host::{Intent, WidgetHost, WidgetId};
use glance_core::prefs::{MemoryPreferences, PreferenceStore, WidgetKey};
use glance_core::registry::WidgetRegistry;
use glance_core::render::ColorPreferences;
use glance_core::resolver::FilterResolver;
use glance_core::scheduler::{
    RefreshOutcome, RefreshTrigger, SchedulerSettings, SuppressionState, UpdateScheduler,
};
use glance_core::surface::{SurfacePayload, SurfaceSettings};
use glance_core::task::{Tag, TaskRecord};
use parking_lot::Mutex;
use tempfile::{TempDir, tempdir};

#[derive(Default)]
struct RecordingHost {
    ids: Vec<WidgetId>,
    failing: Vec<WidgetId>,
    surfaces: Mutex<Vec<SurfacePayload>>,
    notified: Mutex<Vec<WidgetId>>,
}

impl RecordingHost {
    fn last_title(&self, widget_id: WidgetId) -> Option<String> {
        self.surfaces
            .lock()
            .iter()
            .rev()
            .find(|surface| surface.widget_id == widget_id)
            .map(|surface| surface.title.clone())
    }
}

impl WidgetHost for RecordingHost {
    fn instance_ids(&self) -> anyhow::Result<Vec<WidgetId>> {
        Ok(self.ids.clone())
    }

    fn update_surface(&self, payload: &SurfacePayload) -> anyhow::Result<()> {
        if self.failing.contains(&payload.widget_id) {
            return Err(anyhow!("surface {} is gone", payload.widget_id));
        }
        self.surfaces.lock().push(payload.clone());
        Ok(())
    }

    fn notify_data_changed(&self, widget_id: WidgetId) -> anyhow::Result<()> {
        self.notified.lock().push(widget_id);
        Ok(())
    }

    fn set_repeating_timer(&self, _name: &str, _interval: StdDuration) -> anyhow::Result<()> {
        Ok(())
    }

    fn launch(&self, _intent: &Intent) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    store: Arc<DataStore>,
    prefs: Arc<MemoryPreferences>,
    host: Arc<RecordingHost>,
    registry: Arc<WidgetRegistry>,
}

fn fixture(host: RecordingHost) -> Fixture {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open store"));
    let prefs = Arc::new(MemoryPreferences::new());
    let host = Arc::new(host);
    let resolver = Arc::new(FilterResolver::new(prefs.clone(), store.clone(), "Inbox"));
    let registry = Arc::new(WidgetRegistry::new(
        host.clone(),
        store.clone(),
        prefs.clone(),
        resolver,
        SurfaceSettings::default(),
    ));
    Fixture {
        _temp: temp,
        store,
        prefs,
        host,
        registry,
    }
}

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0).unwrap()
}

/// Tag "Inbox" (42) holding a just-completed task, an overdue one and one
/// due later.
fn seed_inbox(store: &DataStore, now: DateTime<Utc>) {
    store
        .save_tags(&[Tag {
            id: 42,
            name: "Inbox".to_string(),
        }])
        .expect("save tags");

    let mut done = TaskRecord::new(1, "file taxes".to_string(), now - Duration::days(3));
    done.completed = Some(now);
    let mut late = TaskRecord::new(2, "renew passport".to_string(), now - Duration::days(3));
    late.due = Some(now - Duration::days(1));
    let mut later = TaskRecord::new(3, "book dentist".to_string(), now - Duration::days(3));
    later.due = Some(now + Duration::days(2));

    let tasks: Vec<TaskRecord> = [done, late, later]
        .into_iter()
        .map(|mut task| {
            task.tags = vec![42];
            task
        })
        .collect();
    store.save_tasks(&tasks).expect("save tasks");
}

#[test]
fn unconfigured_instance_shows_the_inbox() {
    let fx = fixture(RecordingHost::default());
    let filter = fx.registry.resolver().resolve(3, at());
    assert_eq!(filter.title, "Inbox");
    assert_eq!(filter.query, INBOX_QUERY);
    assert!(filter.custom_navigation.is_none());
    assert_eq!(fx.prefs.write_count(), 0);
}

#[test]
fn tagged_inbox_widget_renders_each_row_state() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![7],
        ..RecordingHost::default()
    });
    seed_inbox(&fx.store, now);

    fx.registry.refresh_one(7, now).expect("refresh");
    assert_eq!(
        fx.prefs
            .get_long(&WidgetKey::TagId.for_widget(7))
            .expect("read tag id"),
        Some(42)
    );
    assert_eq!(fx.host.last_title(7).as_deref(), Some("Inbox"));
    assert_eq!(*fx.host.notified.lock(), vec![7]);

    let source = fx.registry.data_source(7);
    assert_eq!(source.count(), 3);

    let colors = ColorPreferences::default();
    let rows: Vec<_> = (0..source.count())
        .map(|pos| {
            source
                .view_at(pos, &colors, now)
                .expect("in range")
                .expect("readable")
        })
        .collect();
    let row = |id: i64| {
        rows.iter()
            .find(|row| row.task_id == id)
            .unwrap_or_else(|| panic!("row {id} missing"))
    };

    assert_eq!(row(1).text_color, colors.done);
    assert!(row(1).strike_through);
    assert_eq!(row(2).text_color, colors.overdue);
    assert!(!row(2).strike_through);
    assert_eq!(row(3).text_color, colors.text);

    assert_eq!(
        source.row_at(3),
        Err(WidgetError::OutOfRange {
            position: 3,
            count: 3
        })
    );
}

#[test]
fn renamed_tag_rewrites_the_widget_once() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![7],
        ..RecordingHost::default()
    });
    seed_inbox(&fx.store, now);
    fx.registry.refresh_one(7, now).expect("first refresh");

    fx.store.rename_tag("Inbox", "Work").expect("rename");
    fx.registry.refresh_one(7, now).expect("refresh after rename");

    assert_eq!(fx.host.last_title(7).as_deref(), Some("Work"));
    assert_eq!(
        fx.prefs
            .get_string(&WidgetKey::Sql.for_widget(7))
            .expect("read query")
            .as_deref(),
        Some("tagid:42 +PENDING ORDER BY smart")
    );
    assert_eq!(fx.registry.data_source(7).count(), 3);

    let writes = fx.prefs.write_count();
    let again = fx.registry.resolver().resolve(7, now);
    assert_eq!(again.title, "Work");
    assert_eq!(again.query, "tagid:42 +PENDING ORDER BY smart");
    assert_eq!(fx.prefs.write_count(), writes);
}

#[test]
fn quoted_tag_name_still_selects_its_tasks() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![7],
        ..RecordingHost::default()
    });
    fx.store
        .save_tags(&[Tag {
            id: 42,
            name: "2\" pipes".to_string(),
        }])
        .expect("save tags");
    let mut task = TaskRecord::new(1, "order fittings".to_string(), now - Duration::days(1));
    task.tags = vec![42];
    fx.store.save_tasks(&[task]).expect("save tasks");
    fx.prefs
        .set_long(&WidgetKey::TagId.for_widget(7), 42)
        .expect("tag id");

    fx.registry.refresh_one(7, now).expect("refresh");
    assert_eq!(fx.host.last_title(7).as_deref(), Some("2\" pipes"));
    assert_eq!(fx.registry.data_source(7).count(), 1);
}

#[test]
fn suppressed_triggers_collapse_into_one_refresh() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![1, 2],
        ..RecordingHost::default()
    });
    seed_inbox(&fx.store, now);
    let scheduler = UpdateScheduler::new(
        fx.registry.clone(),
        fx.host.clone(),
        Arc::new(SuppressionState::new()),
        SchedulerSettings::default(),
    );

    scheduler.suppress(now);
    for minutes in [1, 2, 4] {
        assert_eq!(
            scheduler.request_refresh(
                RefreshTrigger::ExternalListChanged,
                now + Duration::minutes(minutes)
            ),
            RefreshOutcome::Suppressed
        );
    }
    assert!(fx.host.notified.lock().is_empty());

    let outcome = scheduler.request_refresh(RefreshTrigger::Periodic, now + Duration::minutes(5));
    assert!(matches!(outcome, RefreshOutcome::Refreshed(ref report) if report.is_clean()));
    assert_eq!(*fx.host.notified.lock(), vec![1, 2]);
    assert_eq!(fx.registry.data_source(1).generation(), 1);
    assert_eq!(fx.registry.data_source(2).generation(), 1);
}

#[test]
fn failing_instance_is_reported_and_others_refresh() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![1, 2, 3],
        failing: vec![2],
        ..RecordingHost::default()
    });
    seed_inbox(&fx.store, now);

    let report = fx.registry.refresh_all(now);
    assert_eq!(report.refreshed, vec![1, 3]);
    assert!(matches!(
        report.failed.as_slice(),
        [WidgetError::InstanceRefresh { widget_id: 2, .. }]
    ));
    assert_eq!(*fx.host.notified.lock(), vec![1, 3]);
}

#[test]
fn corrupt_task_file_reads_as_unavailable() {
    let now = at();
    let fx = fixture(RecordingHost {
        ids: vec![1],
        ..RecordingHost::default()
    });
    fs::write(&fx.store.tasks_path, "{not json\n").expect("corrupt tasks");

    let source = fx.registry.data_source(1);
    let err = source.open(now).expect_err("unavailable");
    assert!(err.is_data_unavailable());
    assert_eq!(source.count(), 0);
    assert!(fx.registry.refresh_one(1, now).is_err());
    assert!(fx.host.notified.lock().is_empty());
}
