//! Schedule compilation and the next-fire oracle: five-field expression
//! evaluation, guard predicates, and timezone-aware fire-instant search.

pub mod compile;
pub mod cron;
pub mod oracle;

pub use compile::{compile, CompiledSchedule, Guard, ScheduleKind};
pub use cron::CronExpr;
pub use oracle::{
    candidate_allowed, compile_jobs, is_due_now, next_run_after, next_run_times, JobRuntime,
};
