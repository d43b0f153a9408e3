use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use crate::bundle::ValueBundle;
use crate::host::WidgetId;

pub const TEXT_COLOR_KEY: &str = "widget.text_color";
pub const BACKGROUND_COLOR_KEY: &str = "widget.background_color";
pub const SORT_FLAGS_KEY: &str = "sort_flags";
pub const SORT_ORDER_KEY: &str = "sort_order";

/// Per-instance configuration keys, stored as `<prefix><widget id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKey {
    Sql,
    Title,
    Values,
    CustomIntent,
    CustomExtras,
    TagId,
}

impl WidgetKey {
    pub const ALL: [WidgetKey; 6] = [
        WidgetKey::Sql,
        WidgetKey::Title,
        WidgetKey::Values,
        WidgetKey::CustomIntent,
        WidgetKey::CustomExtras,
        WidgetKey::TagId,
    ];

    fn prefix(self) -> &'static str {
        match self {
            WidgetKey::Sql => "widget-sql-",
            WidgetKey::Title => "widget-title-",
            WidgetKey::Values => "widget-values-",
            WidgetKey::CustomIntent => "widget-intent-",
            WidgetKey::CustomExtras => "widget-extras-",
            WidgetKey::TagId => "widget-tag-id-",
        }
    }

    pub fn for_widget(self, widget_id: WidgetId) -> String {
        format!("{}{widget_id}", self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Int(i64),
    Text(String),
}

/// Durable key/value preferences.
///
/// Implementors only provide raw `get`/`put`; the typed accessors treat a
/// value of the wrong type as absent, the same way a missing key is.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<PrefValue>>;

    /// Stores `value`, or removes the key when `value` is `None`.
    fn put(&self, key: &str, value: Option<PrefValue>) -> anyhow::Result<()>;

    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(match self.get(key)? {
            Some(PrefValue::Text(text)) => Some(text),
            _ => None,
        })
    }

    fn set_string(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        self.put(key, value.map(|text| PrefValue::Text(text.to_string())))
    }

    fn get_long(&self, key: &str) -> anyhow::Result<Option<i64>> {
        Ok(match self.get(key)? {
            Some(PrefValue::Int(value)) => Some(value),
            _ => None,
        })
    }

    fn set_long(&self, key: &str, value: i64) -> anyhow::Result<()> {
        self.put(key, Some(PrefValue::Int(value)))
    }

    fn get_int(&self, key: &str) -> anyhow::Result<Option<i32>> {
        Ok(self
            .get_long(key)?
            .and_then(|value| i32::try_from(value).ok()))
    }

    fn set_int(&self, key: &str, value: i32) -> anyhow::Result<()> {
        self.set_long(key, i64::from(value))
    }

    fn get_bundle(&self, key: &str) -> anyhow::Result<Option<ValueBundle>> {
        match self.get_string(key)? {
            Some(raw) => ValueBundle::decode(&raw)
                .with_context(|| format!("invalid bundle under {key}"))
                .map(Some),
            None => Ok(None),
        }
    }

    fn set_bundle(&self, key: &str, value: Option<&ValueBundle>) -> anyhow::Result<()> {
        let encoded = value.map(ValueBundle::encode).transpose()?;
        self.set_string(key, encoded.as_deref())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.put(key, None)
    }
}

/// In-process preferences; the default for tests and embedding hosts that
/// persist on their own.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, PrefValue>>,
    writes: AtomicUsize,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, PrefValue> {
        self.values.lock().clone()
    }

    /// Number of `put` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> anyhow::Result<Option<PrefValue>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Option<PrefValue>) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// Preferences kept in a single JSON object file, rewritten atomically on
/// every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl FilePreferences {
    #[tracing::instrument(skip(path))]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let values = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed parsing {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        info!(file = %path.display(), count = values.len(), "opened preferences");
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    fn save(&self, values: &BTreeMap<String, PrefValue>) -> anyhow::Result<()> {
        debug!(file = %self.path.display(), count = values.len(), "saving preferences");
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        let serialized = serde_json::to_string_pretty(values)?;
        writeln!(temp, "{serialized}")?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> anyhow::Result<Option<PrefValue>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Option<PrefValue>) -> anyhow::Result<()> {
        trace!(key, ?value, "writing preference");
        let mut values = self.values.lock();
        let mut next = values.clone();
        match value {
            Some(value) => {
                next.insert(key.to_string(), value);
            }
            None => {
                if next.remove(key).is_none() {
                    return Ok(());
                }
            }
        }
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}
