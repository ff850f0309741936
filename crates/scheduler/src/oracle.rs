//! Next-fire oracle — computes future fire instants for a compiled
//! schedule under bounds, exclusions, and DST anomalies.
//!
//! DST policy: wall times inside a spring-forward gap are never scheduled;
//! ambiguous fall-back wall times fire exactly once, on the earlier offset.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use chief_domain::error::Result;
use chief_domain::job::JobSpec;

use crate::compile::{compile, CompiledSchedule, ScheduleKind};

/// Upper bound on expression matches examined per query; defends against
/// pathological exclusion patterns.
const MAX_CANDIDATES: usize = 10_000;
/// Upper bound on the wall-clock minutes scanned for a single expression
/// match. Five years covers the sparsest valid pattern (Feb 29).
const MAX_SCAN_MINUTES: i64 = 5 * 366 * 24 * 60;

/// A job paired with its compiled schedule and a stable insertion index
/// used for deterministic tie-breaking in the dispatcher.
#[derive(Clone, Debug)]
pub struct JobRuntime {
    pub spec: JobSpec,
    pub compiled: CompiledSchedule,
    pub index: usize,
}

/// Compile every job spec, preserving declaration order.
pub fn compile_jobs(jobs: Vec<JobSpec>) -> Result<Vec<JobRuntime>> {
    jobs.into_iter()
        .enumerate()
        .map(|(index, spec)| {
            let compiled = compile(&spec.schedule)?;
            Ok(JobRuntime {
                spec,
                compiled,
                index,
            })
        })
        .collect()
}

/// Map a naive local wall time onto the timezone. Gap times yield `None`;
/// ambiguous times resolve to the earlier offset.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    use chrono::offset::LocalResult;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

/// Apply every filter to a candidate local wall time: DST validity, bounds,
/// exclusion dates, and the schedule guard. `Some` carries the resolved
/// local instant (earlier fold for ambiguous times).
pub fn candidate_allowed(
    compiled: &CompiledSchedule,
    candidate_local: NaiveDateTime,
) -> Option<DateTime<Tz>> {
    let local = resolve_local(compiled.tz, candidate_local)?;
    if let Some(start) = compiled.start {
        if local < start {
            return None;
        }
    }
    if let Some(end) = compiled.end {
        if local > end {
            return None;
        }
    }
    if compiled.exclude.contains(&candidate_local.date()) {
        return None;
    }
    compiled.guard.allows(candidate_local).then_some(local)
}

/// Next strictly-future fire instant after `after_utc`, in UTC.
pub fn next_run_after(
    compiled: &CompiledSchedule,
    after_utc: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match compiled.kind {
        ScheduleKind::PureCron | ScheduleKind::Hybrid => next_cron_after(compiled, after_utc),
        ScheduleKind::RuntimeOnly => next_interval_after(compiled, after_utc),
    }
}

fn next_cron_after(compiled: &CompiledSchedule, after_utc: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = compiled.cron.as_ref()?;
    let local_after = after_utc.with_timezone(&compiled.tz).naive_local();

    // Advance to the next whole minute strictly after `after_utc`.
    let mut cursor = local_after + Duration::seconds(60 - local_after.second() as i64);
    cursor = cursor
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(cursor);

    for _ in 0..MAX_CANDIDATES {
        let candidate = next_expr_match(cron, cursor)?;
        if let Some(local) = candidate_allowed(compiled, candidate) {
            return Some(local.with_timezone(&Utc));
        }
        if let Some(end) = compiled.end {
            let past_end = match resolve_local(compiled.tz, candidate) {
                Some(local) => local > end,
                None => candidate > end.naive_local(),
            };
            if past_end {
                return None;
            }
        }
        cursor = candidate + Duration::minutes(1);
    }
    None
}

/// Scan forward minute by minute for the next expression match.
fn next_expr_match(cron: &crate::cron::CronExpr, from: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut cursor = from;
    for _ in 0..MAX_SCAN_MINUTES {
        if cron.matches(cursor) {
            return Some(cursor);
        }
        cursor += Duration::minutes(1);
    }
    None
}

fn next_interval_after(
    compiled: &CompiledSchedule,
    after_utc: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let interval = compiled.interval?;
    let interval_secs = interval.num_seconds();
    if interval_secs <= 0 {
        return None;
    }

    let mut candidate = match compiled.start {
        Some(start) => {
            let start_utc = start.with_timezone(&Utc);
            if after_utc < start_utc {
                start_utc
            } else {
                // Smallest start + k*interval strictly after `after_utc`.
                let elapsed = (after_utc - start_utc).num_seconds();
                let steps = elapsed / interval_secs + 1;
                start_utc + Duration::seconds(steps * interval_secs)
            }
        }
        None => after_utc + interval,
    };

    for _ in 0..MAX_CANDIDATES {
        if let Some(end) = compiled.end {
            if candidate > end.with_timezone(&Utc) {
                return None;
            }
        }
        let naive = candidate.with_timezone(&compiled.tz).naive_local();
        if let Some(local) = candidate_allowed(compiled, naive) {
            // An instant on the later side of a fold resolves to the
            // earlier occurrence; only the earlier one is scheduled.
            if local.with_timezone(&Utc) == candidate {
                return Some(candidate);
            }
        }
        candidate += interval;
    }
    None
}

/// Up to `count` upcoming fires, deduplicated by local minute slot so a
/// fold transition cannot yield the same wall-clock minute twice.
pub fn next_run_times(
    compiled: &CompiledSchedule,
    count: usize,
    now_utc: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut runs = Vec::new();
    let mut seen_slots: HashSet<String> = HashSet::new();
    let mut cursor = now_utc;
    while runs.len() < count {
        let Some(next) = next_run_after(compiled, cursor) else {
            break;
        };
        let local = next.with_timezone(&compiled.tz);
        let slot = local.format("%Y-%m-%d %H:%M").to_string();
        if seen_slots.insert(slot) {
            runs.push(next);
        }
        cursor = next + Duration::seconds(1);
    }
    runs
}

/// Is the job due at `at_utc`, at minute resolution?
pub fn is_due_now(runtime: &JobRuntime, at_utc: DateTime<Utc>) -> bool {
    let compiled = &runtime.compiled;

    if compiled.kind == ScheduleKind::RuntimeOnly {
        let local = at_utc.with_timezone(&compiled.tz);
        let marker = at_utc
            - Duration::seconds(local.second() as i64)
            - Duration::nanoseconds(local.nanosecond() as i64);
        return match next_run_after(compiled, marker - Duration::seconds(1)) {
            Some(candidate) => (candidate - marker).num_milliseconds().abs() < 1000,
            None => false,
        };
    }

    let Some(cron) = compiled.cron.as_ref() else {
        return false;
    };
    let local = at_utc.with_timezone(&compiled.tz);
    let Some(naive) = local
        .naive_local()
        .with_second(0)
        .and_then(|n| n.with_nanosecond(0))
    else {
        return false;
    };
    let Some(resolved) = candidate_allowed(compiled, naive) else {
        return false;
    };
    // During a fall-back fold the truncated wall time resolves to the
    // earlier instant; the later pass through the same wall clock is not due.
    let truncated_utc = at_utc
        - Duration::seconds(local.second() as i64)
        - Duration::nanoseconds(local.nanosecond() as i64);
    if resolved.with_timezone(&Utc) != truncated_utc {
        return false;
    }
    cron.matches(naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chief_domain::schedule::RawSchedule;
    use chrono::TimeZone;

    fn compiled(yaml: &str) -> CompiledSchedule {
        let raw: RawSchedule = serde_yaml::from_str(yaml).unwrap();
        let spec = raw.resolve("schedule", "UTC").unwrap();
        compile(&spec).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // ── Basic progression ────────────────────────────────────────────

    #[test]
    fn next_fire_is_strictly_future() {
        let c = compiled("{frequency: daily, time: \"06:00\"}");
        let next = next_run_after(&c, utc(2026, 2, 23, 6, 0, 30)).unwrap();
        assert_eq!(next, utc(2026, 2, 24, 6, 0, 0));
    }

    #[test]
    fn next_fire_same_day_when_still_ahead() {
        let c = compiled("{frequency: daily, time: \"06:00\"}");
        let next = next_run_after(&c, utc(2026, 2, 23, 5, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 23, 6, 0, 0));
    }

    #[test]
    fn weekly_lands_on_requested_weekday() {
        let c = compiled("{frequency: weekly, day: friday, time: \"17:30\"}");
        // 2026-02-23 is a Monday; next Friday is 2026-02-27.
        let next = next_run_after(&c, utc(2026, 2, 23, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 27, 17, 30, 0));
    }

    #[test]
    fn hybrid_guard_filters_to_last_friday() {
        let c = compiled("{frequency: monthly, ordinal: last, day: friday, time: \"18:00\"}");
        let next = next_run_after(&c, utc(2026, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 30, 18, 0, 0));
    }

    // ── Bounds and exclusions ────────────────────────────────────────

    #[test]
    fn bounds_and_exclusions_shape_the_run_list() {
        let c = compiled(
            "{frequency: daily, time: \"09:00\", start: \"2026-01-01T00:00\", \
             end: \"2026-01-03T23:59:59\", exclude: [\"2026-01-02\"]}",
        );
        let runs = next_run_times(&c, 5, utc(2025, 12, 31, 0, 0, 0));
        assert_eq!(
            runs,
            vec![utc(2026, 1, 1, 9, 0, 0), utc(2026, 1, 3, 9, 0, 0)]
        );
    }

    #[test]
    fn query_past_end_returns_none() {
        let c = compiled(
            "{frequency: daily, time: \"09:00\", end: \"2026-01-03T23:59:59\"}",
        );
        assert!(next_run_after(&c, utc(2026, 1, 4, 0, 0, 0)).is_none());
    }

    #[test]
    fn returned_fires_always_pass_candidate_allowed() {
        let c = compiled(
            "{frequency: daily, time: \"09:00\", start: \"2026-01-01T00:00\", \
             exclude: [\"2026-01-02\", \"2026-01-03\"]}",
        );
        let mut cursor = utc(2025, 12, 30, 0, 0, 0);
        for _ in 0..4 {
            let next = next_run_after(&c, cursor).unwrap();
            assert!(next > cursor);
            let naive = next.with_timezone(&c.tz).naive_local();
            assert!(candidate_allowed(&c, naive).is_some());
            cursor = next;
        }
    }

    // ── Interval schedules ───────────────────────────────────────────

    #[test]
    fn runtime_only_steps_by_interval() {
        let c = compiled("{frequency: interval, every: 90m}");
        let next = next_run_after(&c, utc(2026, 3, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 13, 30, 0));
    }

    #[test]
    fn runtime_only_aligns_to_start_grid() {
        let c = compiled(
            "{frequency: interval, every: 90m, start: \"2026-03-01T00:00\"}",
        );
        // 12:10 is between grid points 12:00 and 13:30.
        let next = next_run_after(&c, utc(2026, 3, 1, 12, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 13, 30, 0));
    }

    #[test]
    fn runtime_only_before_start_fires_at_start() {
        let c = compiled(
            "{frequency: interval, every: 90m, start: \"2026-03-01T00:00\"}",
        );
        let next = next_run_after(&c, utc(2026, 2, 28, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 0, 0, 0));
    }

    #[test]
    fn runtime_only_grid_point_advances_strictly() {
        let c = compiled(
            "{frequency: interval, every: 90m, start: \"2026-03-01T00:00\"}",
        );
        let next = next_run_after(&c, utc(2026, 3, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 13, 30, 0));
    }

    // ── DST anomalies ────────────────────────────────────────────────

    fn eastern(yaml_time: &str) -> CompiledSchedule {
        compiled(&format!(
            "{{frequency: daily, time: \"{yaml_time}\", timezone: America/New_York}}"
        ))
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        // 2026-03-08 02:30 does not exist in America/New_York.
        let c = eastern("02:30");
        let next = next_run_after(&c, utc(2026, 3, 8, 0, 0, 0)).unwrap();
        let local = next.with_timezone(&c.tz);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2026-03-09 02:30");
    }

    #[test]
    fn fall_back_fires_once_on_earlier_offset() {
        // 2026-11-01 01:30 happens twice in America/New_York; EDT (-4) first.
        let c = eastern("01:30");
        let next = next_run_after(&c, utc(2026, 11, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 11, 1, 5, 30, 0)); // 01:30 EDT
        let runs = next_run_times(&c, 2, utc(2026, 11, 1, 0, 0, 0));
        assert_eq!(runs[0], utc(2026, 11, 1, 5, 30, 0));
        // The second occurrence (06:30 UTC = 01:30 EST) is never returned.
        assert_eq!(runs[1], utc(2026, 11, 2, 6, 30, 0));
    }

    #[test]
    fn local_fires_are_distinct_at_minute_resolution() {
        let c = eastern("01:30");
        let runs = next_run_times(&c, 4, utc(2026, 10, 30, 0, 0, 0));
        let mut slots: Vec<String> = runs
            .iter()
            .map(|r| r.with_timezone(&c.tz).format("%Y-%m-%d %H:%M").to_string())
            .collect();
        slots.dedup();
        assert_eq!(slots.len(), runs.len());
    }

    // ── is_due_now ───────────────────────────────────────────────────

    fn runtime_for(yaml: &str) -> JobRuntime {
        let raw: RawSchedule = serde_yaml::from_str(yaml).unwrap();
        let spec = raw.resolve("schedule", "UTC").unwrap();
        let compiled = compile(&spec).unwrap();
        JobRuntime {
            spec: JobSpec {
                name: "t".into(),
                enabled: true,
                working_dir: std::path::PathBuf::from("."),
                stop_on_failure: true,
                overlap: chief_domain::job::OverlapPolicy::Skip,
                scripts: Vec::new(),
                schedule: spec,
                monitor: chief_domain::monitor::JobMonitorSettings::defaulted(false),
            },
            compiled,
            index: 0,
        }
    }

    #[test]
    fn cron_job_due_on_the_matching_minute() {
        let rt = runtime_for("{frequency: daily, time: \"06:00\"}");
        assert!(is_due_now(&rt, utc(2026, 2, 23, 6, 0, 20)));
        assert!(!is_due_now(&rt, utc(2026, 2, 23, 6, 1, 0)));
    }

    #[test]
    fn excluded_date_is_not_due() {
        let rt = runtime_for("{frequency: daily, time: \"06:00\", exclude: [\"2026-02-23\"]}");
        assert!(!is_due_now(&rt, utc(2026, 2, 23, 6, 0, 0)));
        assert!(is_due_now(&rt, utc(2026, 2, 24, 6, 0, 0)));
    }

    #[test]
    fn runtime_only_due_on_interval_boundary() {
        let rt = runtime_for(
            "{frequency: interval, every: 90m, start: \"2026-03-01T00:00\"}",
        );
        assert!(is_due_now(&rt, utc(2026, 3, 1, 13, 30, 0)));
        assert!(!is_due_now(&rt, utc(2026, 3, 1, 13, 31, 0)));
    }
}
