use crate::bundle::ValueBundle;
use crate::task::Tag;

/// Query of the built-in inbox view.
pub const INBOX_QUERY: &str = "+PENDING ORDER BY smart";

/// Navigation extra carrying the tag name.
pub const TAG_EXTRA: &str = "tag";

/// Navigation extra carrying the tag id.
pub const TAG_ID_EXTRA: &str = "tag_id";

/// Screen a widget title tap opens instead of the plain task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    TaskList,
    TagView,
    /// Tag screens of widgets configured by older releases.
    LegacySubtasks,
    Other(String),
}

impl NavigationTarget {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "task-list" => Self::TaskList,
            "tag-view" => Self::TagView,
            "subtasks" => Self::LegacySubtasks,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskList => "task-list",
            Self::TagView => "tag-view",
            Self::LegacySubtasks => "subtasks",
            Self::Other(name) => name.as_str(),
        }
    }

    fn is_tag_screen(&self) -> bool {
        matches!(self, Self::TagView | Self::LegacySubtasks)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomNavigation {
    pub target: NavigationTarget,
    pub extras: ValueBundle,
}

/// One named view over the task store.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub query: String,
    pub title: String,
    pub values_for_new_items: Option<ValueBundle>,
    pub custom_navigation: Option<CustomNavigation>,
}

impl Filter {
    pub fn inbox(title: &str) -> Self {
        Self {
            query: INBOX_QUERY.to_string(),
            title: title.to_string(),
            values_for_new_items: None,
            custom_navigation: None,
        }
    }

    /// The view of every open task carrying `tag`.
    pub fn from_tag(tag: &Tag) -> Self {
        let identity = ValueBundle::new()
            .with(TAG_EXTRA, tag.name.as_str())
            .with(TAG_ID_EXTRA, tag.id);
        Self {
            query: format!("tagid:{} +PENDING ORDER BY smart", tag.id),
            title: tag.name.clone(),
            values_for_new_items: Some(identity.clone()),
            custom_navigation: Some(CustomNavigation {
                target: NavigationTarget::TagView,
                extras: identity,
            }),
        }
    }

    pub fn is_tag_filter(&self) -> bool {
        self.custom_navigation
            .as_ref()
            .map(|nav| nav.target.is_tag_screen())
            .unwrap_or(false)
    }

    /// Name of the tag this filter is scoped to, when it is a tag filter.
    pub fn tag_name(&self) -> Option<&str> {
        self.custom_navigation
            .as_ref()
            .filter(|nav| nav.target.is_tag_screen())
            .and_then(|nav| nav.extras.get_text(TAG_EXTRA))
    }

    /// Points legacy subtask screens at the tag view.
    pub fn normalize_navigation(&mut self) {
        if let Some(nav) = self.custom_navigation.as_mut()
            && nav.target == NavigationTarget::LegacySubtasks
        {
            nav.target = NavigationTarget::TagView;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, INBOX_QUERY, NavigationTarget};
    use crate::task::Tag;

    #[test]
    fn tag_filter_carries_its_identity() {
        let filter = Filter::from_tag(&Tag {
            id: 42,
            name: "Work".to_string(),
        });
        assert_eq!(filter.title, "Work");
        assert!(filter.query.starts_with("tagid:42 "));
        assert!(filter.is_tag_filter());
        assert_eq!(filter.tag_name(), Some("Work"));
        let values = filter.values_for_new_items.expect("values");
        assert_eq!(values.get_int("tag_id"), Some(42));
    }

    #[test]
    fn inbox_is_not_a_tag_filter() {
        let filter = Filter::inbox("Inbox");
        assert_eq!(filter.query, INBOX_QUERY);
        assert!(!filter.is_tag_filter());
        assert_eq!(filter.tag_name(), None);
    }

    #[test]
    fn legacy_subtasks_target_is_normalized() {
        let mut filter = Filter::from_tag(&Tag {
            id: 3,
            name: "Garden".to_string(),
        });
        if let Some(nav) = filter.custom_navigation.as_mut() {
            nav.target = NavigationTarget::parse("subtasks");
        }
        assert!(filter.is_tag_filter());

        filter.normalize_navigation();
        let nav = filter.custom_navigation.expect("navigation");
        assert_eq!(nav.target, NavigationTarget::TagView);
        assert_eq!(nav.target.as_str(), "tag-view");
    }
}
