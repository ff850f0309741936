//! Schedule model — frequency parameters, token parsing, and the validated
//! `ScheduleSpec` the recurrence compiler consumes.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const WEEKDAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scalar tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A wall-clock time of day at minute resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse a strict `HH:MM` 24-hour time (both components zero-padded).
pub fn parse_hhmm(value: &str, field: &str) -> Result<TimeOfDay> {
    let parts: Vec<&str> = value.split(':').collect();
    let ok = parts.len() == 2
        && parts[0].len() == 2
        && parts[1].len() == 2
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit()));
    if !ok {
        return Err(Error::config(format!(
            "{field} must be HH:MM (24-hour), got \"{value}\"."
        )));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| Error::config(format!("{field} must be HH:MM (24-hour), got \"{value}\".")))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| Error::config(format!("{field} must be HH:MM (24-hour), got \"{value}\".")))?;
    if hour > 23 || minute > 59 {
        return Err(Error::config(format!(
            "{field} must be HH:MM (24-hour), got \"{value}\"."
        )));
    }
    Ok(TimeOfDay { hour, minute })
}

/// Normalize a weekday token (name or 0-7, with 7 wrapping to Sunday = 0).
pub fn weekday_number(token: &str, field: &str) -> Result<u32> {
    let tok = token.trim().to_ascii_lowercase();
    if let Some(pos) = WEEKDAY_NAMES.iter().position(|n| *n == tok) {
        return Ok(pos as u32);
    }
    if tok.chars().all(|c| c.is_ascii_digit()) && !tok.is_empty() {
        if let Ok(num) = tok.parse::<u32>() {
            if num == 7 {
                return Ok(0);
            }
            if num <= 6 {
                return Ok(num);
            }
        }
    }
    Err(Error::config(format!(
        "Invalid weekday \"{token}\" at {field}."
    )))
}

pub fn weekday_name(cron_num: u32) -> &'static str {
    WEEKDAY_NAMES[cron_num as usize % 7]
}

/// A weekday selection rendered both as a cron day-of-week token and a
/// human-readable list (e.g. `"1-5"` / `"monday-friday"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeekdayExpr {
    pub cron: String,
    pub human: String,
}

/// Parse a weekday expression: a single name/number, a comma list, a single
/// hyphen range, or a YAML list of any of those.
pub fn parse_weekday_expr(value: &serde_yaml::Value, field: &str) -> Result<WeekdayExpr> {
    if let Some(seq) = value.as_sequence() {
        if seq.is_empty() {
            return Err(Error::config(format!("{field} cannot be empty.")));
        }
        let mut crons = Vec::new();
        let mut humans = Vec::new();
        for item in seq {
            let parsed = parse_weekday_expr(item, &format!("{field}[]"))?;
            crons.push(parsed.cron);
            humans.push(parsed.human);
        }
        return Ok(WeekdayExpr {
            cron: crons.join(","),
            human: humans.join(", "),
        });
    }

    let raw = match value.as_str() {
        Some(s) => s.trim().to_ascii_lowercase(),
        None => {
            return Err(Error::config(format!(
                "{field} must be weekday string or list."
            )))
        }
    };

    if raw.contains(',') {
        let segments: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(Error::config(format!("{field} is empty.")));
        }
        let mut crons = Vec::new();
        let mut humans = Vec::new();
        for segment in segments {
            let parsed =
                parse_weekday_expr(&serde_yaml::Value::String(segment.to_string()), field)?;
            crons.push(parsed.cron);
            humans.push(parsed.human);
        }
        return Ok(WeekdayExpr {
            cron: crons.join(","),
            human: humans.join(", "),
        });
    }

    if raw.matches('-').count() == 1 {
        let (left, right) = raw.split_once('-').unwrap_or((raw.as_str(), ""));
        let left_num = weekday_number(left, field)?;
        let right_num = weekday_number(right, field)?;
        if left_num > right_num {
            return Err(Error::config(format!(
                "Invalid weekday range \"{raw}\" at {field}."
            )));
        }
        return Ok(WeekdayExpr {
            cron: format!("{left_num}-{right_num}"),
            human: format!("{}-{}", weekday_name(left_num), weekday_name(right_num)),
        });
    }

    let num = weekday_number(&raw, field)?;
    Ok(WeekdayExpr {
        cron: num.to_string(),
        human: weekday_name(num).to_string(),
    })
}

/// Parse a weekday expression that must resolve to exactly one weekday.
/// Returns the cron number (Sunday = 0) and the weekday name.
pub fn parse_single_weekday(value: &serde_yaml::Value, field: &str) -> Result<(u32, String)> {
    let expr = parse_weekday_expr(value, field)?;
    if expr.cron.contains(',') || expr.cron.contains('-') {
        return Err(Error::config(format!(
            "{field} must be a single weekday for this frequency."
        )));
    }
    let num: u32 = expr
        .cron
        .parse()
        .map_err(|_| Error::config(format!("Invalid weekday at {field}.")))?;
    Ok((num, expr.human))
}

/// Normalize a month token (name or 1-12).
pub fn month_number(value: &serde_yaml::Value, field: &str) -> Result<u32> {
    let month = if let Some(num) = value.as_u64() {
        num as u32
    } else if let Some(raw) = value.as_str() {
        let tok = raw.trim().to_ascii_lowercase();
        if let Some(pos) = MONTH_NAMES.iter().position(|n| *n == tok) {
            (pos + 1) as u32
        } else if tok.chars().all(|c| c.is_ascii_digit()) && !tok.is_empty() {
            tok.parse::<u32>()
                .map_err(|_| Error::config(format!("Invalid month \"{raw}\" at {field}.")))?
        } else {
            return Err(Error::config(format!("Invalid month \"{raw}\" at {field}.")));
        }
    } else {
        return Err(Error::config(format!(
            "{field} must be month name or number."
        )));
    };
    if !(1..=12).contains(&month) {
        return Err(Error::config(format!("{field} must be between 1 and 12.")));
    }
    Ok(month)
}

pub fn month_name(num: u32) -> &'static str {
    MONTH_NAMES[(num as usize - 1) % 12]
}

pub fn parse_day_of_month(value: &serde_yaml::Value, field: &str) -> Result<u32> {
    let day = value
        .as_u64()
        .ok_or_else(|| Error::config(format!("{field} must be an integer.")))?;
    if !(1..=31).contains(&day) {
        return Err(Error::config(format!("{field} must be between 1 and 31.")));
    }
    Ok(day as u32)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ordinal / interval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which matching weekday of the month an ordinal schedule fires on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ordinal {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl Ordinal {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "first" => Some(Self::First),
            "second" => Some(Self::Second),
            "third" => Some(Self::Third),
            "fourth" => Some(Self::Fourth),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Third => "third",
            Self::Fourth => "fourth",
            Self::Last => "last",
        }
    }

    /// Zero-based index into the month's matching weekdays; `None` = last.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::First => Some(0),
            Self::Second => Some(1),
            Self::Third => Some(2),
            Self::Fourth => Some(3),
            Self::Last => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn suffix(&self) -> char {
        match self {
            Self::Minutes => 'm',
            Self::Hours => 'h',
            Self::Days => 'd',
        }
    }
}

/// A fixed recurrence interval, e.g. `90m`, `2h`, `1d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalEvery {
    pub amount: u32,
    pub unit: IntervalUnit,
}

impl IntervalEvery {
    pub fn duration(&self) -> Duration {
        match self.unit {
            IntervalUnit::Minutes => Duration::minutes(self.amount as i64),
            IntervalUnit::Hours => Duration::hours(self.amount as i64),
            IntervalUnit::Days => Duration::days(self.amount as i64),
        }
    }

    pub fn text(&self) -> String {
        format!("{}{}", self.amount, self.unit.suffix())
    }
}

/// Parse `<N><m|h|d>`. Seconds are rejected: pattern frequencies are
/// minute-granularity throughout.
pub fn parse_interval(value: &str, field: &str) -> Result<IntervalEvery> {
    let raw = value.trim().to_ascii_lowercase();
    if raw.len() < 2 || !raw.is_ascii() {
        return Err(Error::config(format!(
            "{field} must be in format <number><m|h|d>, got \"{value}\"."
        )));
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::config(format!(
            "{field} must be in format <number><m|h|d>, got \"{value}\"."
        )));
    }
    let amount: u32 = digits
        .parse()
        .map_err(|_| Error::config(format!("{field} must be in format <number><m|h|d>, got \"{value}\".")))?;
    if amount == 0 {
        return Err(Error::config(format!("{field} must be > 0.")));
    }
    let unit = match unit {
        "m" => IntervalUnit::Minutes,
        "h" => IntervalUnit::Hours,
        "d" => IntervalUnit::Days,
        "s" => {
            return Err(Error::config(
                "seconds intervals are unsupported. Use m, h, or d in \"every\".".to_string(),
            ))
        }
        _ => {
            return Err(Error::config(format!(
                "{field} must be in format <number><m|h|d>, got \"{value}\"."
            )))
        }
    };
    Ok(IntervalEvery { amount, unit })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron field tokens (custom frequency)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rewrite alphabetic tokens in a cron field to their numeric values using
/// the given name table (weekday or month names).
pub fn replace_named_tokens(raw: &str, names: &[&str], base: u32, field: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut word = String::new();
    for ch in raw.chars().chain(std::iter::once('\0')) {
        if ch.is_ascii_alphabetic() {
            word.push(ch.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            match names.iter().position(|n| *n == word) {
                Some(pos) => out.push_str(&(pos as u32 + base).to_string()),
                None => {
                    return Err(Error::config(format!(
                        "Invalid token \"{word}\" at {field}."
                    )))
                }
            }
            word.clear();
        }
        if ch != '\0' {
            out.push(ch);
        }
    }
    Ok(out)
}

fn validate_range_or_single(token: &str, field: &str, min: u32, max: u32) -> Result<()> {
    if token == "*" {
        return Ok(());
    }
    if let Some((left, right)) = token.split_once('-') {
        let start: u32 = left
            .parse()
            .map_err(|_| Error::config(format!("Invalid range \"{token}\" at {field}.")))?;
        let end: u32 = right
            .parse()
            .map_err(|_| Error::config(format!("Invalid range \"{token}\" at {field}.")))?;
        if start > end {
            return Err(Error::config(format!(
                "Invalid range \"{token}\" at {field}."
            )));
        }
        if start < min || end > max {
            return Err(Error::config(format!(
                "Range \"{token}\" out of bounds {min}-{max} at {field}."
            )));
        }
        return Ok(());
    }
    let value: u32 = token
        .parse()
        .map_err(|_| Error::config(format!("Invalid token \"{token}\" at {field}.")))?;
    if value < min || value > max {
        return Err(Error::config(format!(
            "Value \"{value}\" out of bounds {min}-{max} at {field}."
        )));
    }
    Ok(())
}

/// Validate one five-field cron token: `*`, integers, comma lists, hyphen
/// ranges, and `base/step` forms. Returns the normalized token text.
pub fn validate_cron_token(
    value: &serde_yaml::Value,
    field: &str,
    min: u32,
    max: u32,
) -> Result<String> {
    let token = if let Some(num) = value.as_u64() {
        num.to_string()
    } else if let Some(raw) = value.as_str() {
        raw.trim().to_string()
    } else {
        return Err(Error::config(format!(
            "{field} must be string/int cron token."
        )));
    };
    if token.is_empty() {
        return Err(Error::config(format!("{field} cannot be empty.")));
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '*' | ',' | '/' | '-'))
    {
        return Err(Error::config(format!(
            "Invalid cron token \"{token}\" at {field}."
        )));
    }

    for part in token.split(',') {
        if part.is_empty() {
            return Err(Error::config(format!(
                "Invalid cron token \"{token}\" at {field}."
            )));
        }
        if let Some((base, step_str)) = part.split_once('/') {
            let step: u32 = step_str
                .parse()
                .map_err(|_| Error::config(format!("Invalid step \"{part}\" at {field}.")))?;
            if step == 0 || !step_str.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::config(format!("Invalid step \"{part}\" at {field}.")));
            }
            if base != "*" {
                validate_range_or_single(base, field, min, max)?;
            }
            if step > max - min + 1 {
                return Err(Error::config(format!(
                    "Step \"{step}\" too large at {field}."
                )));
            }
            continue;
        }
        validate_range_or_single(part, field, min, max)?;
    }
    Ok(token)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recurrence + ScheduleSpec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The validated, typed form of a schedule's frequency parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum Recurrence {
    Daily {
        time: TimeOfDay,
        weekdays_only: bool,
    },
    Weekly {
        time: TimeOfDay,
        days: WeekdayExpr,
    },
    MonthlyDay {
        time: TimeOfDay,
        day_of_month: u32,
    },
    MonthlyOrdinal {
        time: TimeOfDay,
        ordinal: Ordinal,
        weekday: u32,
        weekday_name: String,
    },
    Yearly {
        time: TimeOfDay,
        month: u32,
        day_of_month: u32,
    },
    Interval(IntervalEvery),
    /// Five normalized cron field tokens (names already numeric).
    Custom {
        minute: String,
        hour: String,
        day_of_month: String,
        month: String,
        day_of_week: String,
    },
}

/// A validated schedule: typed recurrence, resolved timezone, optional
/// wall-clock bounds, and excluded calendar dates.
#[derive(Clone, Debug)]
pub struct ScheduleSpec {
    pub recurrence: Recurrence,
    pub tz: Tz,
    pub tz_name: String,
    pub start: Option<DateTime<Tz>>,
    pub end: Option<DateTime<Tz>>,
    pub exclude: BTreeSet<NaiveDate>,
}

pub fn parse_timezone(name: &str, field: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::config(format!("Invalid timezone \"{name}\" at {field}.")))
}

/// Parse an ISO-8601 datetime string. Naive values are interpreted in the
/// schedule timezone; offset-carrying values are converted into it.
pub fn parse_iso_datetime(value: &str, tz: Tz, field: &str) -> Result<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&tz));
    }
    const FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d",
    ];
    for format in FORMATS {
        let naive = if format == "%Y-%m-%d" {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        } else {
            NaiveDateTime::parse_from_str(value, format).ok()
        };
        if let Some(naive) = naive {
            return match tz.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => Ok(dt),
                chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest),
                chrono::LocalResult::None => Err(Error::config(format!(
                    "{field} \"{value}\" does not exist in timezone {tz}."
                ))),
            };
        }
    }
    Err(Error::config(format!(
        "{field} must be ISO datetime, got \"{value}\"."
    )))
}

pub fn parse_exclude_dates(
    raw: Option<&serde_yaml::Value>,
    field: &str,
) -> Result<BTreeSet<NaiveDate>> {
    let value = match raw {
        None | Some(serde_yaml::Value::Null) => return Ok(BTreeSet::new()),
        Some(value) => value,
    };
    if let Some(mapping) = value.as_mapping() {
        if mapping.keys().any(|k| k.as_str() == Some("holidays")) {
            return Err(Error::config(
                "named holidays are disabled; use explicit date exclusions in exclude: [YYYY-MM-DD]."
                    .to_string(),
            ));
        }
    }
    let seq = value
        .as_sequence()
        .ok_or_else(|| Error::config(format!("{field} must be a list of YYYY-MM-DD dates.")))?;
    let mut out = BTreeSet::new();
    for (idx, item) in seq.iter().enumerate() {
        let text = item
            .as_str()
            .ok_or_else(|| Error::config(format!("{field}[{idx}] must be YYYY-MM-DD string.")))?;
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
            Error::config(format!("{field}[{idx}] must be YYYY-MM-DD, got \"{text}\"."))
        })?;
        out.insert(date);
    }
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw schedule mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw `schedule:` mapping as it appears in the config document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchedule {
    pub frequency: Option<String>,
    pub time: Option<String>,
    pub weekdays_only: Option<bool>,
    pub day: Option<serde_yaml::Value>,
    pub day_of_month: Option<serde_yaml::Value>,
    pub ordinal: Option<String>,
    pub month: Option<serde_yaml::Value>,
    pub every: Option<String>,
    pub minute: Option<serde_yaml::Value>,
    pub hour: Option<serde_yaml::Value>,
    pub day_of_week: Option<serde_yaml::Value>,
    pub timezone: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub exclude: Option<serde_yaml::Value>,
}

impl RawSchedule {
    /// Reject fields that do not belong to the declared frequency.
    fn check_fields_for_frequency(&self, field: &str, frequency: &str) -> Result<()> {
        let set: [(&str, bool); 9] = [
            ("time", self.time.is_some()),
            ("weekdays_only", self.weekdays_only.is_some()),
            ("day", self.day.is_some()),
            ("day_of_month", self.day_of_month.is_some()),
            ("ordinal", self.ordinal.is_some()),
            ("month", self.month.is_some()),
            ("every", self.every.is_some()),
            ("minute", self.minute.is_some()),
            ("hour", self.hour.is_some()),
        ];
        // day_of_week shares a slot with custom-only fields below.
        let allowed: &[&str] = match frequency {
            "daily" => &["time", "weekdays_only"],
            "weekly" => &["day", "time"],
            "monthly" => &["day_of_month", "ordinal", "day", "time"],
            "yearly" => &["month", "day_of_month", "time"],
            "interval" => &["every"],
            "custom" => &["minute", "hour", "day_of_month", "month", "day_of_week"],
            _ => &[],
        };
        let mut unknown: Vec<&str> = set
            .iter()
            .filter(|(name, present)| *present && !allowed.contains(name))
            .map(|(name, _)| *name)
            .collect();
        if self.day_of_week.is_some() && !allowed.contains(&"day_of_week") {
            unknown.push("day_of_week");
        }
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(Error::config(format!(
                "Unknown fields for {frequency} schedule at {field}: {unknown:?}."
            )));
        }
        Ok(())
    }

    fn required_time(&self, field: &str) -> Result<TimeOfDay> {
        let raw = self
            .time
            .as_deref()
            .ok_or_else(|| Error::config(format!("{field}.time must be HH:MM string.")))?;
        parse_hhmm(raw, &format!("{field}.time"))
    }

    fn parse_recurrence(&self, field: &str, frequency: &str) -> Result<Recurrence> {
        match frequency {
            "daily" => Ok(Recurrence::Daily {
                time: self.required_time(field)?,
                weekdays_only: self.weekdays_only.unwrap_or(false),
            }),
            "weekly" => {
                let time = self.required_time(field)?;
                let day = self
                    .day
                    .as_ref()
                    .ok_or_else(|| Error::config(format!("{field}.day must be weekday string or list.")))?;
                let days = parse_weekday_expr(day, &format!("{field}.day"))?;
                Ok(Recurrence::Weekly { time, days })
            }
            "monthly" => {
                let time = self.required_time(field)?;
                let has_dom = self.day_of_month.is_some();
                let has_ordinal = self.ordinal.is_some();
                let has_day = self.day.is_some();
                if has_dom && (has_ordinal || has_day) {
                    return Err(Error::config(format!(
                        "\"{field}\" monthly schedule cannot mix \"day_of_month\" with \"ordinal/day\"."
                    )));
                }
                if let Some(dom) = &self.day_of_month {
                    let day_of_month = parse_day_of_month(dom, &format!("{field}.day_of_month"))?;
                    return Ok(Recurrence::MonthlyDay { time, day_of_month });
                }
                if let (Some(ordinal_raw), Some(day)) = (self.ordinal.as_deref(), self.day.as_ref())
                {
                    let ordinal = Ordinal::parse(ordinal_raw).ok_or_else(|| {
                        Error::config(format!(
                            "{field}.ordinal must be one of [\"first\", \"fourth\", \"last\", \"second\", \"third\"]."
                        ))
                    })?;
                    let (weekday, weekday_name) =
                        parse_single_weekday(day, &format!("{field}.day"))?;
                    return Ok(Recurrence::MonthlyOrdinal {
                        time,
                        ordinal,
                        weekday,
                        weekday_name,
                    });
                }
                Err(Error::config(
                    "\"monthly\" requires either \"day_of_month\" or \"ordinal + day\".".to_string(),
                ))
            }
            "yearly" => {
                let time = self.required_time(field)?;
                let month_raw = self
                    .month
                    .as_ref()
                    .ok_or_else(|| Error::config(format!("{field}.month must be month name or number.")))?;
                let month = month_number(month_raw, &format!("{field}.month"))?;
                let dom = self
                    .day_of_month
                    .as_ref()
                    .ok_or_else(|| Error::config(format!("{field}.day_of_month must be an integer.")))?;
                let day_of_month = parse_day_of_month(dom, &format!("{field}.day_of_month"))?;
                Ok(Recurrence::Yearly {
                    time,
                    month,
                    day_of_month,
                })
            }
            "interval" => {
                let every = self
                    .every
                    .as_deref()
                    .ok_or_else(|| {
                        Error::config(format!("{field}.every must be interval string like 5m, 2h, 1d."))
                    })?;
                Ok(Recurrence::Interval(parse_interval(
                    every,
                    &format!("{field}.every"),
                )?))
            }
            "custom" => {
                if self.minute.is_none()
                    && self.hour.is_none()
                    && self.day_of_month.is_none()
                    && self.month.is_none()
                    && self.day_of_week.is_none()
                {
                    return Err(Error::config(
                        "\"custom\" requires at least one of [\"minute\", \"hour\", \"day_of_month\", \"month\", \"day_of_week\"]."
                            .to_string(),
                    ));
                }
                let star = serde_yaml::Value::String("*".to_string());
                let minute = validate_cron_token(
                    self.minute.as_ref().unwrap_or(&star),
                    &format!("{field}.minute"),
                    0,
                    59,
                )?;
                let hour = validate_cron_token(
                    self.hour.as_ref().unwrap_or(&star),
                    &format!("{field}.hour"),
                    0,
                    23,
                )?;
                let day_of_month = validate_cron_token(
                    self.day_of_month.as_ref().unwrap_or(&star),
                    &format!("{field}.day_of_month"),
                    1,
                    31,
                )?;
                let month_raw = yaml_token_text(self.month.as_ref().unwrap_or(&star));
                let month_norm = replace_named_tokens(
                    &month_raw,
                    &MONTH_NAMES,
                    1,
                    &format!("{field}.month"),
                )?;
                let month = validate_cron_token(
                    &serde_yaml::Value::String(month_norm),
                    &format!("{field}.month"),
                    1,
                    12,
                )?;
                let dow_raw = yaml_token_text(self.day_of_week.as_ref().unwrap_or(&star));
                let dow_norm = replace_named_tokens(
                    &dow_raw,
                    &WEEKDAY_NAMES,
                    0,
                    &format!("{field}.day_of_week"),
                )?;
                let day_of_week = validate_cron_token(
                    &serde_yaml::Value::String(dow_norm),
                    &format!("{field}.day_of_week"),
                    0,
                    7,
                )?;
                Ok(Recurrence::Custom {
                    minute,
                    hour,
                    day_of_month,
                    month,
                    day_of_week,
                })
            }
            other => Err(Error::config(format!(
                "Unsupported frequency \"{other}\" at {field}."
            ))),
        }
    }

    /// Validate the mapping and produce a `ScheduleSpec`.
    pub fn resolve(&self, field: &str, default_tz_name: &str) -> Result<ScheduleSpec> {
        let frequency = self
            .frequency
            .as_deref()
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| Error::config(format!("{field}.frequency must be a non-empty string.")))?;
        const VALID: [&str; 6] = ["custom", "daily", "interval", "monthly", "weekly", "yearly"];
        if !VALID.contains(&frequency.as_str()) {
            return Err(Error::config(format!(
                "{field}.frequency must be one of {VALID:?}, got \"{frequency}\"."
            )));
        }

        let tz_name = self
            .timezone
            .as_deref()
            .unwrap_or(default_tz_name)
            .to_string();
        let tz = parse_timezone(&tz_name, &format!("{field}.timezone"))?;

        let start = self
            .start
            .as_deref()
            .map(|raw| parse_iso_datetime(raw, tz, &format!("{field}.start")))
            .transpose()?;
        let end = self
            .end
            .as_deref()
            .map(|raw| parse_iso_datetime(raw, tz, &format!("{field}.end")))
            .transpose()?;
        if let (Some(start), Some(end)) = (&start, &end) {
            if start > end {
                return Err(Error::config(format!(
                    "{field}.start must be <= {field}.end."
                )));
            }
        }

        let exclude = parse_exclude_dates(self.exclude.as_ref(), &format!("{field}.exclude"))?;

        self.check_fields_for_frequency(field, &frequency)?;
        let recurrence = self.parse_recurrence(field, &frequency)?;

        Ok(ScheduleSpec {
            recurrence,
            tz,
            tz_name,
            start,
            end,
            exclude,
        })
    }
}

fn yaml_token_text(value: &serde_yaml::Value) -> String {
    if let Some(num) = value.as_u64() {
        num.to_string()
    } else if let Some(raw) = value.as_str() {
        raw.trim().to_ascii_lowercase()
    } else {
        String::new()
    }
}
