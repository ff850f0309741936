//! Core domain model for chief: configuration loading, job and schedule
//! types, and the shared error type.

pub mod config;
pub mod error;
pub mod job;
pub mod monitor;
pub mod schedule;
pub mod script;

pub use config::{load_config, system_timezone, ChiefConfig};
pub use error::{Error, Result};
pub use job::{JobRunResult, JobSpec, OverlapPolicy, ScriptError, ScriptRunResult};
pub use monitor::{JobMonitorSettings, MonitorSettings};
pub use schedule::{Ordinal, Recurrence, ScheduleSpec};
pub use script::ScriptSpec;
