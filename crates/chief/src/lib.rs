//! chief — declarative, configuration-driven job scheduler and
//! orchestrator: compile recurrence rules, preview and export schedules,
//! run jobs one-shot, or supervise them as a daemon.

pub mod cli;
pub mod runtime;
