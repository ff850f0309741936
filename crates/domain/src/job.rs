//! Job model — overlap policy, the validated `JobSpec`, and run outcome
//! records.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitor::JobMonitorSettings;
use crate::schedule::ScheduleSpec;
use crate::script::ScriptSpec;

/// What the dispatcher does when a fire lands while a prior instance of the
/// same job is still running.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the trigger.
    Skip,
    /// Defer at most one trigger until the running instance completes.
    Queue,
    /// Allow concurrent instances.
    Parallel,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

impl OverlapPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Queue => "queue",
            Self::Parallel => "parallel",
        }
    }

    pub fn parse(value: Option<&str>, field: &str, default: Self) -> Result<Self> {
        let raw = match value {
            None => return Ok(default),
            Some(raw) => raw.trim().to_ascii_lowercase(),
        };
        match raw.as_str() {
            "skip" => Ok(Self::Skip),
            "queue" => Ok(Self::Queue),
            "parallel" => Ok(Self::Parallel),
            _ => Err(Error::config(format!(
                "{field} must be one of [\"parallel\", \"queue\", \"skip\"], got \"{raw}\"."
            ))),
        }
    }
}

/// A fully validated job declaration.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub name: String,
    pub enabled: bool,
    pub working_dir: PathBuf,
    pub stop_on_failure: bool,
    pub overlap: OverlapPolicy,
    pub scripts: Vec<ScriptSpec>,
    pub schedule: ScheduleSpec,
    pub monitor: JobMonitorSettings,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a script run failed beyond a plain non-zero exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptError {
    Timeout,
    Exception,
}

impl ScriptError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Exception => "exception",
        }
    }
}

/// Outcome of one child-script execution.
#[derive(Clone, Debug)]
pub struct ScriptRunResult {
    pub script: ScriptSpec,
    pub success: bool,
    pub return_code: i32,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ScriptError>,
}

impl ScriptRunResult {
    pub fn duration_ms(&self) -> i64 {
        self.duration.num_milliseconds()
    }
}

/// Outcome of one job invocation (every script it executed).
#[derive(Clone, Debug)]
pub struct JobRunResult {
    pub job_name: String,
    pub success: bool,
    pub script_results: Vec<ScriptRunResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl JobRunResult {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Declared path of the first failed script, if any.
    pub fn first_failed_script(&self) -> Option<&str> {
        self.script_results
            .iter()
            .find(|r| !r.success)
            .map(|r| r.script.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_parse_defaults_and_values() {
        assert_eq!(
            OverlapPolicy::parse(None, "f", OverlapPolicy::Skip).unwrap(),
            OverlapPolicy::Skip
        );
        assert_eq!(
            OverlapPolicy::parse(Some("QUEUE"), "f", OverlapPolicy::Skip).unwrap(),
            OverlapPolicy::Queue
        );
        assert!(OverlapPolicy::parse(Some("sometimes"), "f", OverlapPolicy::Skip).is_err());
    }

    #[test]
    fn overlap_serde_snake_case() {
        let json = serde_json::to_string(&OverlapPolicy::Parallel).unwrap();
        assert_eq!(json, "\"parallel\"");
    }
}
