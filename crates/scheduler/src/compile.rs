//! Recurrence compiler — turns a validated `ScheduleSpec` into a
//! `CompiledSchedule`: a five-field expression and/or interval plus a
//! runtime guard, tagged by kind.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use chief_domain::error::{Error, Result};
use chief_domain::schedule::{month_name, IntervalUnit, Ordinal, Recurrence, ScheduleSpec};

use crate::cron::CronExpr;

/// How a compiled schedule generates fire instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fires exactly where the five-field expression matches.
    PureCron,
    /// Expression matches are further filtered by a non-trivial guard.
    Hybrid,
    /// No five-field equivalent; fires by stepping a fixed interval.
    RuntimeOnly,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PureCron => "pure_cron",
            Self::Hybrid => "hybrid",
            Self::RuntimeOnly => "runtime_only",
        }
    }
}

/// Runtime predicate applied to every candidate local time. Kept as a
/// tagged variant rather than a closure so compiled schedules stay Clone,
/// Send, and deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    Always,
    /// Candidate must be the Nth (or last) occurrence of `weekday`
    /// (cron numbering, Sunday = 0) within its calendar month.
    OrdinalWeekday { weekday: u32, ordinal: Ordinal },
}

impl Guard {
    pub fn allows(&self, local: NaiveDateTime) -> bool {
        match *self {
            Self::Always => true,
            Self::OrdinalWeekday { weekday, ordinal } => {
                ordinal_weekday_matches(local.date(), weekday, ordinal)
            }
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, Self::Always)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn ordinal_weekday_matches(date: NaiveDate, weekday: u32, ordinal: Ordinal) -> bool {
    if date.weekday().num_days_from_sunday() != weekday {
        return false;
    }
    let Some(first) = NaiveDate::from_ymd_opt(date.year(), date.month(), 1) else {
        return false;
    };
    let first_dow = first.weekday().num_days_from_sunday() as i64;
    let first_match = 1 + (weekday as i64 - first_dow).rem_euclid(7) as u32;
    let last_day = days_in_month(date.year(), date.month());
    match ordinal.index() {
        Some(idx) => {
            let day = first_match + 7 * idx as u32;
            day <= last_day && date.day() == day
        }
        None => {
            let last_match = first_match + 7 * ((last_day - first_match) / 7);
            date.day() == last_match
        }
    }
}

/// A schedule compiled for the next-fire oracle and the dispatcher.
#[derive(Clone, Debug)]
pub struct CompiledSchedule {
    pub kind: ScheduleKind,
    pub cron: Option<CronExpr>,
    pub interval: Option<Duration>,
    pub interval_text: Option<String>,
    pub guard: Guard,
    pub tz: Tz,
    pub tz_name: String,
    pub start: Option<DateTime<Tz>>,
    pub end: Option<DateTime<Tz>>,
    pub exclude: BTreeSet<NaiveDate>,
    pub description: String,
}

impl CompiledSchedule {
    /// The five-field expression text, when one exists.
    pub fn cron_expr(&self) -> Option<String> {
        self.cron.as_ref().map(|c| c.to_string())
    }
}

/// Compile a validated schedule. Pure and deterministic: the same spec
/// always yields the same kind, expression, and description.
pub fn compile(spec: &ScheduleSpec) -> Result<CompiledSchedule> {
    let builder = Builder {
        spec,
        interval: None,
        interval_text: None,
    };
    match &spec.recurrence {
        Recurrence::Daily {
            time,
            weekdays_only,
        } => {
            let dow = if *weekdays_only { "1-5" } else { "*" };
            let description = if *weekdays_only {
                format!("Runs every weekday at {time} ({})", spec.tz_name)
            } else {
                format!("Runs daily at {time} ({})", spec.tz_name)
            };
            builder.pure_cron(
                &format!("{} {} * * {dow}", time.minute, time.hour),
                description,
            )
        }
        Recurrence::Weekly { time, days } => builder.pure_cron(
            &format!("{} {} * * {}", time.minute, time.hour, days.cron),
            format!("Runs every {} at {time} ({})", days.human, spec.tz_name),
        ),
        Recurrence::MonthlyDay { time, day_of_month } => builder.pure_cron(
            &format!("{} {} {day_of_month} * *", time.minute, time.hour),
            format!(
                "Runs monthly on day {day_of_month} at {time} ({})",
                spec.tz_name
            ),
        ),
        Recurrence::MonthlyOrdinal {
            time,
            ordinal,
            weekday,
            weekday_name,
        } => builder.hybrid(
            &format!("{} {} * * {weekday}", time.minute, time.hour),
            Guard::OrdinalWeekday {
                weekday: *weekday,
                ordinal: *ordinal,
            },
            format!(
                "Runs monthly on the {} {weekday_name} at {time} ({})",
                ordinal.as_str(),
                spec.tz_name
            ),
        ),
        Recurrence::Yearly {
            time,
            month,
            day_of_month,
        } => builder.pure_cron(
            &format!("{} {} {day_of_month} {month} *", time.minute, time.hour),
            format!(
                "Runs yearly on {} {day_of_month} at {time} ({})",
                month_name(*month),
                spec.tz_name
            ),
        ),
        Recurrence::Interval(every) => {
            let builder = Builder {
                spec,
                interval: Some(every.duration()),
                interval_text: Some(every.text()),
            };
            let tz_name = &spec.tz_name;
            match every.unit {
                IntervalUnit::Minutes if 60 % every.amount == 0 => builder.pure_cron(
                    &format!("*/{} * * * *", every.amount),
                    format!("Runs every {} minute(s) ({tz_name})", every.amount),
                ),
                IntervalUnit::Hours if 24 % every.amount == 0 => builder.pure_cron(
                    &format!("0 */{} * * *", every.amount),
                    format!("Runs every {} hour(s) ({tz_name})", every.amount),
                ),
                IntervalUnit::Days if every.amount == 1 => builder.pure_cron(
                    "0 0 * * *",
                    format!("Runs every day at 00:00 ({tz_name})"),
                ),
                _ => builder.runtime_only(format!(
                    "Runs every {} using runtime scheduler ({tz_name})",
                    every.text()
                )),
            }
        }
        Recurrence::Custom {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        } => builder.pure_cron(
            &format!("{minute} {hour} {day_of_month} {month} {day_of_week}"),
            format!("Runs on custom schedule ({})", spec.tz_name),
        ),
    }
}

struct Builder<'a> {
    spec: &'a ScheduleSpec,
    interval: Option<Duration>,
    interval_text: Option<String>,
}

impl Builder<'_> {
    fn finish(
        self,
        kind: ScheduleKind,
        cron: Option<CronExpr>,
        guard: Guard,
        description: String,
    ) -> CompiledSchedule {
        CompiledSchedule {
            kind,
            cron,
            interval: self.interval,
            interval_text: self.interval_text,
            guard,
            tz: self.spec.tz,
            tz_name: self.spec.tz_name.clone(),
            start: self.spec.start,
            end: self.spec.end,
            exclude: self.spec.exclude.clone(),
            description,
        }
    }

    fn pure_cron(self, expr: &str, description: String) -> Result<CompiledSchedule> {
        let cron = CronExpr::parse(expr)
            .map_err(|e| Error::config(format!("Invalid cron expression \"{expr}\": {e}.")))?;
        Ok(self.finish(ScheduleKind::PureCron, Some(cron), Guard::Always, description))
    }

    fn hybrid(self, expr: &str, guard: Guard, description: String) -> Result<CompiledSchedule> {
        let cron = CronExpr::parse(expr)
            .map_err(|e| Error::config(format!("Invalid cron expression \"{expr}\": {e}.")))?;
        Ok(self.finish(ScheduleKind::Hybrid, Some(cron), guard, description))
    }

    fn runtime_only(self, description: String) -> Result<CompiledSchedule> {
        Ok(self.finish(ScheduleKind::RuntimeOnly, None, Guard::Always, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chief_domain::schedule::RawSchedule;

    fn compiled(yaml: &str) -> CompiledSchedule {
        let raw: RawSchedule = serde_yaml::from_str(yaml).unwrap();
        let spec = raw.resolve("schedule", "UTC").unwrap();
        compile(&spec).unwrap()
    }

    #[test]
    fn weekly_friday_compiles_to_pure_cron() {
        let c = compiled("{frequency: weekly, day: friday, time: \"17:30\"}");
        assert_eq!(c.kind, ScheduleKind::PureCron);
        assert_eq!(c.cron_expr().as_deref(), Some("30 17 * * 5"));
        assert!(c.guard.is_trivial());
    }

    #[test]
    fn daily_weekdays_only_restricts_dow() {
        let c = compiled("{frequency: daily, time: \"06:15\", weekdays_only: true}");
        assert_eq!(c.cron_expr().as_deref(), Some("15 6 * * 1-5"));
        assert!(c.description.contains("every weekday"));
    }

    #[test]
    fn monthly_last_friday_is_hybrid_with_guard() {
        let c = compiled("{frequency: monthly, ordinal: last, day: friday, time: \"18:00\"}");
        assert_eq!(c.kind, ScheduleKind::Hybrid);
        assert_eq!(c.cron_expr().as_deref(), Some("0 18 * * 5"));
        // 2026-01-30 is the last Friday of January 2026; 2026-01-23 is not.
        let accept = NaiveDate::from_ymd_opt(2026, 1, 30)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap();
        let reject = NaiveDate::from_ymd_opt(2026, 1, 23)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap();
        assert!(c.guard.allows(accept));
        assert!(!c.guard.allows(reject));
    }

    #[test]
    fn monthly_fifth_ordinal_absent_in_short_months() {
        // February 2026 has only four Sundays; "fourth sunday" = 22nd.
        let guard = Guard::OrdinalWeekday {
            weekday: 0,
            ordinal: Ordinal::Fourth,
        };
        let fourth = NaiveDate::from_ymd_opt(2026, 2, 22)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert!(guard.allows(fourth));
        let guard_last = Guard::OrdinalWeekday {
            weekday: 0,
            ordinal: Ordinal::Last,
        };
        assert!(guard_last.allows(fourth), "fourth is also last here");
    }

    #[test]
    fn yearly_includes_month_field() {
        let c = compiled("{frequency: yearly, month: march, day_of_month: 31, time: \"08:00\"}");
        assert_eq!(c.cron_expr().as_deref(), Some("0 8 31 3 *"));
        assert!(c.description.contains("march 31"));
    }

    #[test]
    fn interval_divisible_minutes_promote_to_cron() {
        let c = compiled("{frequency: interval, every: 15m}");
        assert_eq!(c.kind, ScheduleKind::PureCron);
        assert_eq!(c.cron_expr().as_deref(), Some("*/15 * * * *"));
        assert_eq!(c.interval, Some(Duration::minutes(15)));
    }

    #[test]
    fn interval_hours_promote_when_dividing_day() {
        let c = compiled("{frequency: interval, every: 6h}");
        assert_eq!(c.cron_expr().as_deref(), Some("0 */6 * * *"));
    }

    #[test]
    fn interval_one_day_promotes_to_midnight() {
        let c = compiled("{frequency: interval, every: 1d}");
        assert_eq!(c.cron_expr().as_deref(), Some("0 0 * * *"));
    }

    #[test]
    fn ninety_minutes_is_runtime_only() {
        let c = compiled("{frequency: interval, every: 90m}");
        assert_eq!(c.kind, ScheduleKind::RuntimeOnly);
        assert!(c.cron.is_none());
        assert_eq!(c.interval, Some(Duration::minutes(90)));
        assert_eq!(c.interval_text.as_deref(), Some("90m"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compiled("{frequency: weekly, day: friday, time: \"17:30\"}");
        let b = compiled("{frequency: weekly, day: friday, time: \"17:30\"}");
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.cron_expr(), b.cron_expr());
        assert_eq!(a.description, b.description);
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2026, 12), 31);
    }
}
