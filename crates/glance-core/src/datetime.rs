//! Calendar helpers: the project
//! timezone, and the date expressions
//! accepted by `add --due` and by
//! query predicates such as
//! `completed.after:`.

use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  NaiveDate,
  TimeDelta,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::{
  debug,
  warn
};

const TIMEZONE_ENV_VAR: &str =
  "GLANCE_TIMEZONE";
const TIMEZONE_FILE_ENV_VAR: &str =
  "GLANCE_TIME_CONFIG";
const TIMEZONE_FILE: &str =
  "glance-time.toml";

#[derive(Debug, Deserialize)]
struct TimeFile {
  timezone: String
}

/// Timezone calendar expressions
/// (`today`, `2026-03-01`) and due
/// dates are read in. Resolved once;
/// UTC unless configured.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(|| {
    configured_timezone()
      .unwrap_or(chrono_tz::UTC)
  })
}

fn configured_timezone() -> Option<Tz> {
  let (raw, source) =
    match std::env::var(TIMEZONE_ENV_VAR)
    {
      | Ok(raw)
        if !raw.trim().is_empty() =>
      {
        (raw, TIMEZONE_ENV_VAR.to_string())
      }
      | _ => {
        let path = timezone_file()?;
        let raw =
          read_timezone_file(&path)?;
        (raw, path.display().to_string())
      }
    };

  match raw.trim().parse::<Tz>() {
    | Ok(tz) => {
      debug!(source = %source, timezone = %tz, "project timezone configured");
      Some(tz)
    }
    | Err(err) => {
      warn!(source = %source, timezone = %raw, error = %err, "ignoring unknown timezone");
      None
    }
  }
}

fn timezone_file() -> Option<PathBuf> {
  std::env::var_os(TIMEZONE_FILE_ENV_VAR)
    .map(PathBuf::from)
    .or_else(|| {
      std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_FILE))
    })
    .filter(|path| path.exists())
}

fn read_timezone_file(
  path: &Path
) -> Option<String> {
  let parsed = fs::read_to_string(path)
    .map_err(anyhow::Error::from)
    .and_then(|raw| {
      toml::from_str::<TimeFile>(&raw)
        .map_err(anyhow::Error::from)
    });

  match parsed {
    | Ok(file) => Some(file.timezone),
    | Err(err) => {
      warn!(file = %path.display(), error = %err, "ignoring timezone file");
      None
    }
  }
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_project_date(
  dt: DateTime<Utc>
) -> String {
  to_project_date(dt)
    .format("%Y-%m-%d")
    .to_string()
}

fn relative_re() -> Option<&'static Regex>
{
  static RELATIVE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  RELATIVE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<count>\d+)(?P<unit>[wdhm])$"
      )
      .map_err(|err| {
        tracing::error!(error = %err, "internal regex compile failure");
      })
      .ok()
    })
    .as_ref()
}

/// Parses `now`, `today`,
/// `tomorrow`, `yesterday`, signed
/// offsets (`+3d`, `-2h`, `+90m`,
/// `+1w`), RFC 3339 instants and
/// `YYYY-MM-DD` dates (midnight in the
/// project timezone).
///
/// Offsets that leave chrono's range
/// are errors.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();

  match token
    .to_ascii_lowercase()
    .as_str()
  {
    | "now" => return Ok(now),
    | "today" => {
      return start_of_day(
        to_project_date(now)
      );
    }
    | "tomorrow" => {
      let date = to_project_date(now)
        .succ_opt()
        .ok_or_else(|| {
          anyhow!("no day after {now}")
        })?;
      return start_of_day(date);
    }
    | "yesterday" => {
      let date = to_project_date(now)
        .pred_opt()
        .ok_or_else(|| {
          anyhow!("no day before {now}")
        })?;
      return start_of_day(date);
    }
    | _ => {}
  }

  if let Some(caps) = relative_re()
    .and_then(|re| re.captures(token))
  {
    return shift(
      now,
      &caps["sign"],
      &caps["count"],
      &caps["unit"]
    )
    .with_context(|| {
      format!(
        "invalid relative date: \
         {token}"
      )
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return start_of_day(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input} (expected now, today, \
     tomorrow, yesterday, +Nd, -Nh, \
     +Nm, +Nw, RFC 3339 or YYYY-MM-DD)"
  ))
}

fn shift(
  now: DateTime<Utc>,
  sign: &str,
  count: &str,
  unit: &str
) -> anyhow::Result<DateTime<Utc>> {
  let count: i64 =
    count.parse().context(
      "offset count does not fit"
    )?;
  let delta = match unit {
    | "w" => TimeDelta::try_weeks(count),
    | "d" => TimeDelta::try_days(count),
    | "h" => TimeDelta::try_hours(count),
    | _ => TimeDelta::try_minutes(count)
  }
  .ok_or_else(|| {
    anyhow!("offset is out of range")
  })?;

  let shifted = if sign == "-" {
    now.checked_sub_signed(delta)
  } else {
    now.checked_add_signed(delta)
  };
  shifted.ok_or_else(|| {
    anyhow!(
      "offset leaves the supported \
       date range"
    )
  })
}

/// First instant of `date` in the
/// project timezone. A DST gap can
/// swallow midnight, in which case the
/// first hour that exists wins.
fn start_of_day(
  date: NaiveDate
) -> anyhow::Result<DateTime<Utc>> {
  let tz = project_timezone();
  (0..24)
    .find_map(|hour| {
      date
        .and_hms_opt(hour, 0, 0)
        .and_then(|naive| {
          tz.from_local_datetime(&naive)
            .earliest()
        })
    })
    .map(|local| {
      local.with_timezone(&Utc)
    })
    .ok_or_else(|| {
      anyhow!(
        "{date} has no start in \
         {tz}"
      )
    })
}
