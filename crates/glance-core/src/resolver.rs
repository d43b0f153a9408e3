//! Derives the filter behind a widget instance from its persisted
//! configuration, repairing that configuration when the source collection
//! was renamed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bundle::ValueBundle;
use crate::error::WidgetError;
use crate::filter::{CustomNavigation, Filter, NavigationTarget};
use crate::host::WidgetId;
use crate::prefs::{PreferenceStore, SORT_FLAGS_KEY, SORT_ORDER_KEY, WidgetKey};
use crate::query::{
    Query, SortFlags, SortOrder, adjust_for_flags_and_sort, inject_tag_restriction, strip_limit,
};
use crate::service::TaskQueryService;

pub struct FilterResolver {
    prefs: Arc<dyn PreferenceStore>,
    service: Arc<dyn TaskQueryService>,
    default_title: String,
}

impl FilterResolver {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        service: Arc<dyn TaskQueryService>,
        default_title: &str,
    ) -> Self {
        Self {
            prefs,
            service,
            default_title: default_title.to_string(),
        }
    }

    pub fn default_filter(&self) -> Filter {
        Filter::inbox(&self.default_title)
    }

    /// The filter backing `widget_id`.
    ///
    /// Persisted overrides are laid over the inbox filter. When the instance
    /// remembers a source collection whose live name no longer matches the
    /// title, the filter is rebuilt from the collection and written back;
    /// otherwise the collection named like the title, if any, is remembered.
    /// Lookup and write failures are logged and never fail the resolution.
    #[tracing::instrument(skip(self, now))]
    pub fn resolve(&self, widget_id: WidgetId, now: DateTime<Utc>) -> Filter {
        let mut filter = self.default_filter();

        if let Some(sql) = self.read_string(WidgetKey::Sql, widget_id) {
            match Query::parse(&sql, now) {
                Ok(_) => filter.query = sql,
                Err(err) => {
                    warn!(widget_id, query = %sql, error = %err, "ignoring invalid query override")
                }
            }
        }
        if let Some(title) = self.read_string(WidgetKey::Title, widget_id)
            && !title.trim().is_empty()
        {
            filter.title = title;
        }
        if let Some(values) = self.read_bundle(WidgetKey::Values, widget_id) {
            filter.values_for_new_items = Some(values);
        }
        if let Some(target) = self.read_string(WidgetKey::CustomIntent, widget_id)
            && !target.trim().is_empty()
        {
            filter.custom_navigation = Some(CustomNavigation {
                target: NavigationTarget::parse(&target),
                extras: self
                    .read_bundle(WidgetKey::CustomExtras, widget_id)
                    .unwrap_or_default(),
            });
        }

        let tag_id = logged(
            WidgetKey::TagId,
            widget_id,
            self.prefs.get_long(&WidgetKey::TagId.for_widget(widget_id)),
        )
        .unwrap_or(0);
        if tag_id > 0 {
            self.repair_drift(widget_id, tag_id, &mut filter);
        } else {
            self.backfill_tag_id(widget_id, &filter);
        }

        filter.query = strip_limit(&filter.query);
        filter
    }

    fn repair_drift(&self, widget_id: WidgetId, tag_id: i64, filter: &mut Filter) {
        let tag = match self.service.tag_by_id(tag_id) {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                debug!(widget_id, tag_id, "source collection is gone; keeping filter");
                return;
            }
            Err(err) => {
                let err = WidgetError::DriftRepair {
                    tag_id,
                    reason: format!("{err:#}"),
                };
                warn!(widget_id, error = %err, "keeping stale filter");
                return;
            }
        };

        if tag.name == filter.title {
            return;
        }

        info!(widget_id, tag_id, from = %filter.title, to = %tag.name, "source collection renamed; rebuilding filter");
        let rebuilt = Filter::from_tag(&tag);
        if let Err(err) = self.persist(widget_id, &rebuilt) {
            let err = WidgetError::DriftRepair {
                tag_id,
                reason: format!("{err:#}"),
            };
            warn!(widget_id, error = %err, "failed to persist repaired filter");
        }
        *filter = rebuilt;
    }

    fn backfill_tag_id(&self, widget_id: WidgetId, filter: &Filter) {
        match self.service.tag_by_name(&filter.title) {
            Ok(Some(tag)) => {
                debug!(widget_id, tag_id = tag.id, "remembering source collection");
                let key = WidgetKey::TagId.for_widget(widget_id);
                if let Err(err) = self.prefs.set_long(&key, tag.id) {
                    warn!(widget_id, error = %err, "failed to remember source collection");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(widget_id, title = %filter.title, error = %err, "source collection lookup failed")
            }
        }
    }

    /// Writes every part of `filter` under the instance's keys.
    pub fn persist(&self, widget_id: WidgetId, filter: &Filter) -> anyhow::Result<()> {
        let prefs = &self.prefs;
        prefs.set_string(&WidgetKey::Sql.for_widget(widget_id), Some(&filter.query))?;
        prefs.set_string(&WidgetKey::Title.for_widget(widget_id), Some(&filter.title))?;
        prefs.set_bundle(
            &WidgetKey::Values.for_widget(widget_id),
            filter.values_for_new_items.as_ref(),
        )?;
        if let Some(nav) = &filter.custom_navigation {
            prefs.set_string(
                &WidgetKey::CustomIntent.for_widget(widget_id),
                Some(nav.target.as_str()),
            )?;
            prefs.set_bundle(
                &WidgetKey::CustomExtras.for_widget(widget_id),
                Some(&nav.extras),
            )?;
        }
        Ok(())
    }

    /// Drops every persisted key of `widget_id`.
    pub fn forget(&self, widget_id: WidgetId) -> anyhow::Result<()> {
        for key in WidgetKey::ALL {
            self.prefs.remove(&key.for_widget(widget_id))?;
        }
        Ok(())
    }

    /// The query a cursor for `filter` is opened with: visibility flags and
    /// sort order mixed in, limits dropped, tag scope enforced.
    #[tracing::instrument(skip(self, filter, now), fields(title = %filter.title))]
    pub fn effective_query(&self, widget_id: WidgetId, filter: &Filter, now: DateTime<Utc>) -> String {
        let mut filter = filter.clone();
        filter.normalize_navigation();

        let flags = SortFlags(self.read_global_int(SORT_FLAGS_KEY).unwrap_or(0))
            .with(SortFlags::SHOW_RECENTLY_COMPLETED);
        let order = match self.read_global_int(SORT_ORDER_KEY).unwrap_or(0) {
            0 => SortOrder::Widget,
            raw => SortOrder::from_pref(raw),
        };

        let query = strip_limit(&adjust_for_flags_and_sort(&filter.query, flags, order, now));
        if !filter.is_tag_filter() {
            return query;
        }

        let tag_name = self
            .read_string(WidgetKey::Title, widget_id)
            .filter(|title| !title.trim().is_empty())
            .or_else(|| filter.tag_name().map(str::to_string));
        match tag_name {
            Some(name) => inject_tag_restriction(&query, &name),
            None => query,
        }
    }

    fn read_string(&self, key: WidgetKey, widget_id: WidgetId) -> Option<String> {
        logged(key, widget_id, self.prefs.get_string(&key.for_widget(widget_id)))
    }

    fn read_bundle(&self, key: WidgetKey, widget_id: WidgetId) -> Option<ValueBundle> {
        logged(key, widget_id, self.prefs.get_bundle(&key.for_widget(widget_id)))
    }

    fn read_global_int(&self, key: &str) -> Option<i32> {
        self.prefs.get_int(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "failed reading preference");
            None
        })
    }
}

fn logged<T>(key: WidgetKey, widget_id: WidgetId, result: anyhow::Result<Option<T>>) -> Option<T> {
    result.unwrap_or_else(|err| {
        warn!(widget_id, key = ?key, error = %err, "failed reading widget preference");
        None
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use chrono::{DateTime, TimeZone, Utc};

    use super::FilterResolver;
    use crate::filter::{Filter, INBOX_QUERY};
    use crate::prefs::{MemoryPreferences, PreferenceStore, SORT_ORDER_KEY, WidgetKey};
    use crate::task::Tag;
    use crate::testing::StubService;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
    }

    fn resolver(
        service: StubService,
    ) -> (FilterResolver, Arc<MemoryPreferences>, Arc<StubService>) {
        let prefs = Arc::new(MemoryPreferences::new());
        let service = Arc::new(service);
        (
            FilterResolver::new(prefs.clone(), service.clone(), "Inbox"),
            prefs,
            service,
        )
    }

    #[test]
    fn no_overrides_resolve_to_the_inbox() {
        let (resolver, prefs, _) = resolver(StubService::default());
        let filter = resolver.resolve(3, at());
        assert_eq!(filter, Filter::inbox("Inbox"));
        assert!(!filter.query.contains("LIMIT"));
        assert_eq!(prefs.write_count(), 0);
    }

    #[test]
    fn invalid_query_and_blank_title_overrides_are_ignored() {
        let (resolver, prefs, _) = resolver(StubService::default());
        prefs
            .set_string(&WidgetKey::Sql.for_widget(1), Some("( +PENDING"))
            .expect("sql");
        prefs
            .set_string(&WidgetKey::Title.for_widget(1), Some("   "))
            .expect("title");

        let filter = resolver.resolve(1, at());
        assert_eq!(filter.query, INBOX_QUERY);
        assert_eq!(filter.title, "Inbox");
    }

    #[test]
    fn out_of_range_date_override_falls_back_to_the_inbox() {
        let (resolver, prefs, _) = resolver(StubService::default());
        prefs
            .set_string(
                &WidgetKey::Sql.for_widget(1),
                Some("due.before:+9999999999999d"),
            )
            .expect("sql");
        assert_eq!(resolver.resolve(1, at()).query, INBOX_QUERY);
    }

    #[test]
    fn limit_clauses_are_stripped_from_overrides() {
        let (resolver, prefs, _) = resolver(StubService::default());
        prefs
            .set_string(
                &WidgetKey::Sql.for_widget(2),
                Some("+OVERDUE ORDER BY due LIMIT 5"),
            )
            .expect("sql");
        assert_eq!(resolver.resolve(2, at()).query, "+OVERDUE ORDER BY due");
    }

    #[test]
    fn title_match_back_fills_the_tag_id() {
        let (resolver, prefs, _) = resolver(StubService::default().with_tag(42, "Inbox"));
        resolver.resolve(7, at());
        assert_eq!(
            prefs
                .get_long(&WidgetKey::TagId.for_widget(7))
                .expect("read"),
            Some(42)
        );
    }

    #[test]
    fn rename_is_repaired_once() {
        let (resolver, prefs, service) = resolver(StubService::default().with_tag(42, "Inbox"));
        resolver.resolve(7, at());
        service.rename_tag(42, "Work");

        let repaired = resolver.resolve(7, at());
        assert_eq!(repaired.title, "Work");
        assert!(repaired.query.starts_with("tagid:42 "));
        assert!(repaired.is_tag_filter());
        assert_eq!(
            prefs
                .get_string(&WidgetKey::Title.for_widget(7))
                .expect("read")
                .as_deref(),
            Some("Work")
        );
        assert_eq!(
            prefs
                .get_string(&WidgetKey::CustomIntent.for_widget(7))
                .expect("read")
                .as_deref(),
            Some("tag-view")
        );

        let writes = prefs.write_count();
        assert_eq!(resolver.resolve(7, at()), repaired);
        assert_eq!(prefs.write_count(), writes);
    }

    #[test]
    fn failed_lookup_keeps_the_stale_filter() {
        let (resolver, prefs, service) = resolver(StubService::default().with_tag(42, "Work"));
        prefs
            .set_long(&WidgetKey::TagId.for_widget(7), 42)
            .expect("tag id");
        service.fail_tag_lookup.store(true, Ordering::SeqCst);

        let writes = prefs.write_count();
        let filter = resolver.resolve(7, at());
        assert_eq!(filter.title, "Inbox");
        assert_eq!(prefs.write_count(), writes);
    }

    #[test]
    fn effective_query_mixes_in_sort_and_tag_scope() {
        let now = at();
        let (resolver, prefs, _) = resolver(StubService::default());

        let inbox = resolver.effective_query(1, &Filter::inbox("Inbox"), now);
        assert!(inbox.contains("completed.after:2026-06-01T09:59:00Z"));
        assert!(inbox.ends_with("ORDER BY widget"));

        prefs.set_int(SORT_ORDER_KEY, 1).expect("order");
        let tagged = Filter::from_tag(&Tag {
            id: 42,
            name: "Work".to_string(),
        });
        let query = resolver.effective_query(1, &tagged, now);
        assert!(query.contains("tag:\"Work\""));
        assert!(query.ends_with("ORDER BY title"));

        prefs
            .set_string(&WidgetKey::Title.for_widget(1), Some("Office"))
            .expect("title");
        assert!(
            resolver
                .effective_query(1, &tagged, now)
                .contains("tag:\"Office\"")
        );
    }
}
