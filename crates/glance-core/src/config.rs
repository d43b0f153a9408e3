use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration as StdDuration;

use anyhow::{
  Context,
  anyhow
};
use chrono::Duration;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::host::WidgetId;
use crate::render::{
  ColorPreferences,
  parse_argb
};
use crate::scheduler::{
  DEFAULT_SUPPRESS_WINDOW_MINUTES,
  DEFAULT_UPDATE_INTERVAL_MINUTES,
  SchedulerSettings
};
use crate::surface::SurfaceSettings;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    glancerc_override
  ))]
  pub fn load(
    glancerc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let glancerc =
      resolve_glancerc_path(
        glancerc_override
      )?;
    if let Some(path) = glancerc {
      info!(glancerc = %path.display(), "loading glancerc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no glancerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  /// Built-in values, before any rc
  /// file or override.
  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (key, value) in [
      ("data.location", "~/.glance"),
      ("widget.instances", "1"),
      ("widget.update_interval", "30"),
      ("widget.suppress_window", "5"),
      ("widget.default_title", "Inbox"),
      ("widget.tablet_layout", "off"),
      ("color", "on")
    ] {
      cfg.map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    cfg
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  fn get_parsed<T>(
    &self,
    key: &str,
    default: T
  ) -> anyhow::Result<T>
  where
    T: std::str::FromStr
  {
    match self.map.get(key) {
      | Some(raw) => {
        raw.trim().parse().map_err(|_| {
          anyhow!(
            "invalid value for {key}: \
             {raw}"
          )
        })
      }
      | None => Ok(default)
    }
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            strip_comment(
              include_rest.trim()
            )
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value =
        strip_comment(v.trim()).to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Typed view of the `widget.*` and
/// `color.*` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetSettings {
  pub instances:     Vec<WidgetId>,
  pub default_title: String,
  pub scheduler:     SchedulerSettings,
  pub surface:       SurfaceSettings
}

impl WidgetSettings {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let instances = parse_instances(
      &cfg
        .get("widget.instances")
        .unwrap_or_else(|| {
          "1".to_string()
        })
    )?;

    let update_minutes: u64 = cfg
      .get_parsed(
        "widget.update_interval",
        DEFAULT_UPDATE_INTERVAL_MINUTES
      )?;
    if update_minutes == 0 {
      return Err(anyhow!(
        "widget.update_interval must \
         be at least one minute"
      ));
    }
    let update_interval = update_minutes
      .checked_mul(60)
      .map(StdDuration::from_secs)
      .ok_or_else(|| {
        anyhow!(
          "widget.update_interval is \
           too large: {update_minutes}"
        )
      })?;
    let suppress_minutes: i64 = cfg
      .get_parsed(
        "widget.suppress_window",
        DEFAULT_SUPPRESS_WINDOW_MINUTES
      )?;
    let suppress_window =
      Duration::try_minutes(
        suppress_minutes.max(0)
      )
      .ok_or_else(|| {
        anyhow!(
          "widget.suppress_window is \
           too large: {suppress_minutes}"
        )
      })?;

    let default_title = cfg
      .get("widget.default_title")
      .filter(|title| {
        !title.trim().is_empty()
      })
      .unwrap_or_else(|| {
        "Inbox".to_string()
      });

    let mut colors =
      ColorPreferences::default();
    for (key, slot) in [
      ("color.text", &mut colors.text),
      (
        "color.background",
        &mut colors.background
      ),
      ("color.done", &mut colors.done),
      (
        "color.overdue",
        &mut colors.overdue
      )
    ] {
      if let Some(raw) = cfg.get(key) {
        *slot = parse_argb(&raw)
          .with_context(|| {
            format!("invalid {key}")
          })?;
      }
    }

    Ok(Self {
      instances,
      default_title,
      scheduler: SchedulerSettings {
        update_interval,
        suppress_window
      },
      surface: SurfaceSettings {
        tablet_layout:  cfg
          .get_bool(
            "widget.tablet_layout"
          )
          .unwrap_or(false),
        default_colors: colors
      }
    })
  }
}

/// `widget.instances` is either a
/// count (`3` means ids 1, 2, 3) or a
/// comma separated id list.
fn parse_instances(
  raw: &str
) -> anyhow::Result<Vec<WidgetId>> {
  let raw = raw.trim();
  if raw.contains(',') {
    return raw
      .split(',')
      .map(|id| {
        id.trim().parse().map_err(|_| {
          anyhow!(
            "invalid widget id in \
             widget.instances: {id}"
          )
        })
      })
      .collect();
  }

  let count: WidgetId =
    raw.parse().map_err(|_| {
      anyhow!(
        "invalid widget.instances: \
         {raw}"
      )
    })?;
  Ok((1..=count.max(0)).collect())
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_glancerc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(glancerc_env) =
    std::env::var("GLANCERC")
  {
    if glancerc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      glancerc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    return Ok(None);
  };
  let candidate =
    home.join(".glancerc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".glance"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

/// Drops a trailing ` # comment`. A
/// value may itself start with `#`
/// (colors are `#AARRGGBB`).
fn strip_comment(value: &str) -> &str {
  let from =
    usize::from(value.starts_with('#'));
  match value[from..].find(" #") {
    | Some(idx) => {
      value[..from + idx].trim_end()
    }
    | None => value
  }
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
