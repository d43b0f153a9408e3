use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::bundle::ValueBundle;
use crate::config::Config;
use crate::datetime::format_project_date;
use crate::host::{
    ACTION_COMPLETE_TASK, ACTION_EDIT_TASK, EXTRA_OPEN_TASK, EXTRA_TASK_ID, Intent, LaunchTarget,
};
use crate::prefs::{BACKGROUND_COLOR_KEY, PreferenceStore, TEXT_COLOR_KEY};
use crate::surface::SurfacePayload;
use crate::task::TaskSnapshot;

/// Packed `0xAARRGGBB` color.
pub type Argb = u32;

pub const DEFAULT_TEXT_COLOR: Argb = 0xFF21_2121;
pub const DEFAULT_BACKGROUND_COLOR: Argb = 0xFFFA_FAFA;
pub const DEFAULT_DONE_COLOR: Argb = 0xFF9E_9E9E;
pub const DEFAULT_OVERDUE_COLOR: Argb = 0xFFD3_2F2F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPreferences {
    pub text: Argb,
    pub background: Argb,
    pub done: Argb,
    pub overdue: Argb,
}

impl Default for ColorPreferences {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_COLOR,
            background: DEFAULT_BACKGROUND_COLOR,
            done: DEFAULT_DONE_COLOR,
            overdue: DEFAULT_OVERDUE_COLOR,
        }
    }
}

impl ColorPreferences {
    /// `defaults` with the user's text and background colors applied.
    pub fn load(prefs: &dyn PreferenceStore, defaults: &ColorPreferences) -> Self {
        let read = |key: &str| match prefs.get_long(key) {
            Ok(value) => value.and_then(argb_from_pref),
            Err(err) => {
                tracing::warn!(key, error = %err, "failed reading color preference");
                None
            }
        };

        Self {
            text: read(TEXT_COLOR_KEY).unwrap_or(defaults.text),
            background: read(BACKGROUND_COLOR_KEY).unwrap_or(defaults.background),
            ..*defaults
        }
    }
}

// Colors may have been stored as signed 32-bit values.
fn argb_from_pref(value: i64) -> Option<Argb> {
    u32::try_from(value)
        .ok()
        .or_else(|| i32::try_from(value).ok().map(|signed| signed as u32))
}

/// Parses `#AARRGGBB` or `#RRGGBB` (opaque).
pub fn parse_argb(raw: &str) -> anyhow::Result<Argb> {
    let hex = raw.trim().trim_start_matches('#');
    let value = u32::from_str_radix(hex, 16).map_err(|_| anyhow!("invalid color: {raw}"))?;
    match hex.len() {
        8 => Ok(value),
        6 => Ok(0xFF00_0000 | value),
        _ => Err(anyhow!("invalid color: {raw} (expected #AARRGGBB or #RRGGBB)")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconSet {
    Plain,
    PlainChecked,
    Repeat,
    RepeatChecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckboxIcon {
    pub set: IconSet,
    /// Importance level, `0` being the most important.
    pub level: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowDescriptor {
    pub task_id: i64,
    pub display_text: String,
    pub text_color: Argb,
    pub strike_through: bool,
    pub checkbox_icon: CheckboxIcon,
    pub text_tap: Intent,
    pub checkbox_tap: Intent,
}

/// Describes how one task row looks and what tapping it does.
pub fn render(snapshot: &TaskSnapshot, colors: &ColorPreferences, now: DateTime<Utc>) -> RowDescriptor {
    let completed = snapshot.is_completed();
    let text_color = if completed {
        colors.done
    } else if snapshot.is_overdue(now) {
        colors.overdue
    } else {
        colors.text
    };

    let set = match (snapshot.is_repeating(), completed) {
        (false, false) => IconSet::Plain,
        (false, true) => IconSet::PlainChecked,
        (true, false) => IconSet::Repeat,
        (true, true) => IconSet::RepeatChecked,
    };

    let text_tap = Intent::new(LaunchTarget::Provider)
        .with_action(ACTION_EDIT_TASK)
        .with_extras(
            &ValueBundle::new()
                .with(EXTRA_TASK_ID, snapshot.id)
                .with(EXTRA_OPEN_TASK, snapshot.id),
        );
    let checkbox_tap = Intent::new(LaunchTarget::Provider)
        .with_action(ACTION_COMPLETE_TASK)
        .with_extras(&ValueBundle::new().with(EXTRA_TASK_ID, snapshot.id));

    RowDescriptor {
        task_id: snapshot.id,
        display_text: snapshot.title.clone(),
        text_color,
        strike_through: completed,
        checkbox_icon: CheckboxIcon {
            set,
            level: snapshot.importance_index(),
        },
        text_tap,
        checkbox_tap,
    }
}

/// Prints widget surfaces and their rows to the terminal.
#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, surface, rows, dues))]
    pub fn print_widget(
        &mut self,
        surface: &SurfacePayload,
        rows: &[RowDescriptor],
        dues: &[Option<DateTime<Utc>>],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(
            out,
            "{} {}",
            self.paint(&format!("[{}]", surface.widget_id), "33"),
            self.paint(&surface.title, "1")
        )?;

        if rows.is_empty() {
            writeln!(out, "  {}", surface.empty_view)?;
            writeln!(out)?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "".to_string(),
            "Due".to_string(),
            "Task".to_string(),
        ];

        let mut cells = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let due = dues
                .get(idx)
                .copied()
                .flatten()
                .map(format_project_date)
                .unwrap_or_default();

            let mut codes = vec![truecolor(row.text_color)];
            if row.strike_through {
                codes.push("9".to_string());
            }

            cells.push(vec![
                self.paint(&row.task_id.to_string(), "33"),
                checkbox_glyph(row.checkbox_icon),
                due,
                self.paint(&row.display_text, &codes.join(";")),
            ]);
        }

        write_table(&mut out, headers, cells)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn print_launch(&mut self, intent: &Intent) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let extras = intent
            .extras
            .iter()
            .map(|(key, value)| format!("{key}={value:?}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(
            out,
            "{} {:?} {}",
            self.paint("launch", "36"),
            intent.target,
            extras
        )?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn truecolor(argb: Argb) -> String {
    let [_, r, g, b] = argb.to_be_bytes();
    format!("38;2;{r};{g};{b}")
}

fn checkbox_glyph(icon: CheckboxIcon) -> String {
    let (mark, repeat) = match icon.set {
        IconSet::Plain => (' ', ""),
        IconSet::PlainChecked => ('x', ""),
        IconSet::Repeat => (' ', "~"),
        IconSet::RepeatChecked => ('x', "~"),
    };
    let level = "!".repeat(crate::task::IMPORTANCE_LEVELS - 1 - icon.level);
    format!("[{mark}]{repeat}{level}")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        ColorPreferences, IconSet, checkbox_glyph, parse_argb, render, strip_ansi, write_table,
    };
    use crate::host::{ACTION_COMPLETE_TASK, ACTION_EDIT_TASK};
    use crate::prefs::{MemoryPreferences, PreferenceStore, TEXT_COLOR_KEY};
    use crate::task::{IMPORTANCE_LEVELS, TaskSnapshot};

    fn snapshot(id: i64) -> TaskSnapshot {
        TaskSnapshot {
            id,
            title: "  Pay rent  ".to_string(),
            due: None,
            completed: None,
            importance: 1,
            recurrence: None,
        }
    }

    #[test]
    fn render_is_pure_and_keeps_the_title() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let colors = ColorPreferences::default();
        let task = snapshot(4);

        let first = render(&task, &colors, now);
        assert_eq!(first, render(&task, &colors, now));
        assert_eq!(first.display_text, "  Pay rent  ");
        assert_eq!(first.text_color, colors.text);
        assert!(!first.strike_through);
        assert_eq!(first.text_tap.action.as_deref(), Some(ACTION_EDIT_TASK));
        assert_eq!(first.text_tap.extras.get_int("open_task"), Some(4));
        assert_eq!(first.checkbox_tap.action.as_deref(), Some(ACTION_COMPLETE_TASK));
        assert_eq!(first.checkbox_tap.extras.get_int("task_id"), Some(4));
    }

    #[test]
    fn completion_wins_over_overdue() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let colors = ColorPreferences::default();
        let mut task = snapshot(1);
        task.due = Some(now - Duration::days(1));
        assert_eq!(render(&task, &colors, now).text_color, colors.overdue);

        task.completed = Some(now);
        let done = render(&task, &colors, now);
        assert_eq!(done.text_color, colors.done);
        assert!(done.strike_through);
        assert_eq!(done.checkbox_icon.set, IconSet::PlainChecked);
    }

    #[test]
    fn out_of_bound_importance_uses_the_last_icon() {
        let now = Utc::now();
        let colors = ColorPreferences::default();
        let mut task = snapshot(1);
        task.completed = Some(now);
        task.recurrence = Some("FREQ=DAILY".to_string());

        task.importance = (IMPORTANCE_LEVELS - 1) as i64;
        let at_bound = render(&task, &colors, now).checkbox_icon;
        task.importance = 40;
        let beyond = render(&task, &colors, now).checkbox_icon;

        assert_eq!(beyond, at_bound);
        assert_eq!(beyond.set, IconSet::RepeatChecked);
        assert_eq!(checkbox_glyph(beyond), "[x]~");
    }

    #[test]
    fn colors_come_from_preferences_then_defaults() {
        let prefs = MemoryPreferences::new();
        prefs.set_long(TEXT_COLOR_KEY, -16_777_216).expect("set");

        let colors = ColorPreferences::load(&prefs, &ColorPreferences::default());
        assert_eq!(colors.text, 0xFF00_0000);
        assert_eq!(colors.background, ColorPreferences::default().background);
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_argb("#80112233").expect("argb"), 0x8011_2233);
        assert_eq!(parse_argb("#112233").expect("rgb"), 0xFF11_2233);
        assert!(parse_argb("#1234").is_err());
        assert!(parse_argb("teal").is_err());
    }

    #[test]
    fn table_pads_by_visible_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["ID".to_string(), "Task".to_string()],
            vec![vec!["\x1b[33m7\x1b[0m".to_string(), "tea".to_string()]],
        )
        .expect("table");
        let text = strip_ansi(&String::from_utf8(out).expect("utf8"));
        assert_eq!(text.lines().nth(2), Some("7  tea  "));
    }
}
