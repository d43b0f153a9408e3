use crate::bundle::ValueBundle;
use crate::filter::Filter;
use crate::host::{
    EXTRA_FILTER_QUERY, EXTRA_FILTER_TITLE, EXTRA_NEW_ITEM_VALUES, EXTRA_OPEN_TASK,
    EXTRA_OVERRIDE_FINISH_ANIM, EXTRA_WIDGET_ID, Intent, LaunchTarget, WidgetId,
};
use crate::render::{Argb, ColorPreferences};

pub const EMPTY_VIEW_TEXT: &str = "No tasks to show";

/// Tells the host which data source fills the list of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterBinding {
    pub widget_id: WidgetId,
    pub query: String,
}

/// Everything the host needs to draw one instance, rows excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfacePayload {
    pub widget_id: WidgetId,
    pub title: String,
    pub background_color: Argb,
    pub adapter: AdapterBinding,
    pub empty_view: String,
    /// Click template the per-row fill-ins are merged into.
    pub row_template: Intent,
    pub title_click: Intent,
    pub new_item_click: Intent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceSettings {
    pub tablet_layout: bool,
    pub default_colors: ColorPreferences,
}

#[tracing::instrument(skip(filter, colors, settings), fields(title = %filter.title))]
pub fn build_surface(
    widget_id: WidgetId,
    filter: &Filter,
    colors: &ColorPreferences,
    settings: &SurfaceSettings,
) -> anyhow::Result<SurfacePayload> {
    let custom_extras = filter
        .custom_navigation
        .as_ref()
        .map(|nav| nav.extras.clone());

    let title_target = match &filter.custom_navigation {
        Some(nav) => LaunchTarget::Custom(nav.target.as_str().to_string()),
        None => LaunchTarget::TaskList,
    };
    let mut title_extras = ValueBundle::new()
        .with(EXTRA_WIDGET_ID, i64::from(widget_id))
        .with(EXTRA_FILTER_QUERY, filter.query.as_str())
        .with(EXTRA_FILTER_TITLE, filter.title.as_str());
    if let Some(extras) = &custom_extras {
        title_extras.merge(extras);
    }
    let title_click = Intent::new(title_target)
        .with_action(&format!("L{widget_id}{}", filter.query))
        .with_extras(&title_extras);

    let mut new_item_extras = ValueBundle::new()
        .with(EXTRA_FILTER_QUERY, filter.query.as_str())
        .with(EXTRA_OVERRIDE_FINISH_ANIM, false);
    let new_item_target = if settings.tablet_layout {
        new_item_extras.insert(EXTRA_OPEN_TASK, 0_i64);
        LaunchTarget::TaskList
    } else {
        LaunchTarget::TaskEdit
    };
    let mut new_item_action = format!("E{widget_id}");
    if let Some(values) = &filter.values_for_new_items {
        let encoded = values.encode()?;
        new_item_action.push_str(&encoded);
        new_item_extras.insert(EXTRA_NEW_ITEM_VALUES, encoded);
    }
    if settings.tablet_layout
        && let Some(extras) = &custom_extras
    {
        new_item_extras.merge(extras);
    }
    let new_item_click = Intent::new(new_item_target)
        .with_action(&new_item_action)
        .with_extras(&new_item_extras);

    let mut row_extras = ValueBundle::new().with(EXTRA_WIDGET_ID, i64::from(widget_id));
    if settings.tablet_layout
        && let Some(extras) = &custom_extras
    {
        row_extras.merge(extras);
    }
    let row_template = Intent::new(LaunchTarget::Provider).with_extras(&row_extras);

    Ok(SurfacePayload {
        widget_id,
        title: filter.title.clone(),
        background_color: colors.background,
        adapter: AdapterBinding {
            widget_id,
            query: filter.query.clone(),
        },
        empty_view: EMPTY_VIEW_TEXT.to_string(),
        row_template,
        title_click,
        new_item_click,
    })
}

#[cfg(test)]
mod tests {
    use super::{SurfaceSettings, build_surface};
    use crate::filter::Filter;
    use crate::host::LaunchTarget;
    use crate::render::ColorPreferences;
    use crate::task::Tag;

    fn work() -> Filter {
        Filter::from_tag(&Tag {
            id: 42,
            name: "Work".to_string(),
        })
    }

    #[test]
    fn title_click_follows_custom_navigation() {
        let colors = ColorPreferences::default();
        let payload =
            build_surface(7, &work(), &colors, &SurfaceSettings::default()).expect("surface");

        assert_eq!(payload.title, "Work");
        assert_eq!(payload.background_color, colors.background);
        assert_eq!(
            payload.title_click.target,
            LaunchTarget::Custom("tag-view".to_string())
        );
        assert_eq!(payload.title_click.extras.get_int("tag_id"), Some(42));
        assert_eq!(payload.new_item_click.target, LaunchTarget::TaskEdit);
        assert!(
            payload
                .new_item_click
                .extras
                .get_text("new_item_values")
                .is_some()
        );
        assert_eq!(payload.row_template.extras.get_text("tag"), None);
    }

    #[test]
    fn tablet_layout_routes_through_the_list() {
        let settings = SurfaceSettings {
            tablet_layout: true,
            ..SurfaceSettings::default()
        };
        let payload = build_surface(7, &work(), &ColorPreferences::default(), &settings)
            .expect("surface");

        assert_eq!(payload.new_item_click.target, LaunchTarget::TaskList);
        assert_eq!(payload.new_item_click.extras.get_int("open_task"), Some(0));
        assert_eq!(payload.row_template.extras.get_text("tag"), Some("Work"));
    }

    #[test]
    fn inbox_title_opens_the_task_list() {
        let payload = build_surface(
            1,
            &Filter::inbox("Inbox"),
            &ColorPreferences::default(),
            &SurfaceSettings::default(),
        )
        .expect("surface");
        assert_eq!(payload.title_click.target, LaunchTarget::TaskList);
        assert_eq!(payload.adapter.query, "+PENDING ORDER BY smart");
        assert_eq!(payload.new_item_click.action.as_deref(), Some("E1"));
    }
}
