use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::data_source::ListDataSource;
use crate::error::WidgetError;
use crate::host::{WidgetHost, WidgetId};
use crate::prefs::PreferenceStore;
use crate::render::ColorPreferences;
use crate::resolver::FilterResolver;
use crate::service::TaskQueryService;
use crate::surface::{SurfaceSettings, build_surface};

/// What one fan-out refresh did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<WidgetId>,
    pub failed: Vec<WidgetError>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Live instances and the data source of each.
pub struct WidgetRegistry {
    host: Arc<dyn WidgetHost>,
    service: Arc<dyn TaskQueryService>,
    prefs: Arc<dyn PreferenceStore>,
    resolver: Arc<FilterResolver>,
    settings: SurfaceSettings,
    sources: Mutex<HashMap<WidgetId, Arc<ListDataSource>>>,
}

impl WidgetRegistry {
    pub fn new(
        host: Arc<dyn WidgetHost>,
        service: Arc<dyn TaskQueryService>,
        prefs: Arc<dyn PreferenceStore>,
        resolver: Arc<FilterResolver>,
        settings: SurfaceSettings,
    ) -> Self {
        Self {
            host,
            service,
            prefs,
            resolver,
            settings,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<FilterResolver> {
        &self.resolver
    }

    pub fn all_instance_ids(&self) -> anyhow::Result<Vec<WidgetId>> {
        self.host.instance_ids()
    }

    /// Colors rows of every instance are rendered with.
    pub fn colors(&self) -> ColorPreferences {
        ColorPreferences::load(self.prefs.as_ref(), &self.settings.default_colors)
    }

    /// The data source of `widget_id`, created unopened on first use.
    pub fn data_source(&self, widget_id: WidgetId) -> Arc<ListDataSource> {
        let mut sources = self.sources.lock();
        sources
            .entry(widget_id)
            .or_insert_with(|| {
                debug!(widget_id, "creating data source");
                Arc::new(ListDataSource::new(
                    widget_id,
                    self.resolver.clone(),
                    self.service.clone(),
                ))
            })
            .clone()
    }

    /// Reopens the instance's cursor, pushes its rebuilt surface and asks
    /// the host to re-pull rows.
    #[tracing::instrument(skip(self, now))]
    pub fn refresh_one(&self, widget_id: WidgetId, now: DateTime<Utc>) -> Result<(), WidgetError> {
        let failed = |reason: String| WidgetError::InstanceRefresh { widget_id, reason };

        let source = self.data_source(widget_id);
        let filter = source.refresh(now).map_err(|err| failed(err.to_string()))?;

        let payload = build_surface(widget_id, &filter, &self.colors(), &self.settings)
            .map_err(|err| failed(format!("{err:#}")))?;
        self.host
            .update_surface(&payload)
            .map_err(|err| failed(format!("{err:#}")))?;
        self.host
            .notify_data_changed(widget_id)
            .map_err(|err| failed(format!("{err:#}")))?;
        Ok(())
    }

    /// Refreshes every live instance; one failing instance does not stop
    /// the others. Data sources of instances that are gone are dropped.
    #[tracing::instrument(skip(self, now))]
    pub fn refresh_all(&self, now: DateTime<Utc>) -> RefreshReport {
        let ids = match self.all_instance_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "failed to enumerate widget instances");
                return RefreshReport::default();
            }
        };

        self.prune(&ids);
        self.refresh_ids(&ids, now)
    }

    pub fn refresh_only(&self, widget_id: WidgetId, now: DateTime<Utc>) -> RefreshReport {
        self.refresh_ids(&[widget_id], now)
    }

    fn refresh_ids(&self, ids: &[WidgetId], now: DateTime<Utc>) -> RefreshReport {
        let mut report = RefreshReport::default();
        for &widget_id in ids {
            match self.refresh_one(widget_id, now) {
                Ok(()) => report.refreshed.push(widget_id),
                Err(err) => {
                    warn!(widget_id, error = %err, "widget refresh failed");
                    report.failed.push(err);
                }
            }
        }
        info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "widget refresh finished"
        );
        report
    }

    fn prune(&self, live: &[WidgetId]) {
        let stale: Vec<Arc<ListDataSource>> = {
            let mut sources = self.sources.lock();
            let gone: Vec<WidgetId> = sources
                .keys()
                .copied()
                .filter(|id| !live.contains(id))
                .collect();
            gone.iter().filter_map(|id| sources.remove(id)).collect()
        };
        for source in stale {
            debug!(widget_id = source.widget_id(), "dropping data source of removed instance");
            source.close();
        }
    }

    pub fn remove_instance(&self, widget_id: WidgetId) {
        let removed = self.sources.lock().remove(&widget_id);
        if let Some(source) = removed {
            source.close();
        }
        info!(widget_id, "widget instance removed");
    }

    /// Ids that currently own a data source.
    pub fn tracked_ids(&self) -> Vec<WidgetId> {
        let mut ids: Vec<WidgetId> = self.sources.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
