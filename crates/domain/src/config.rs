//! Configuration document loading — YAML parsing, defaults resolution, and
//! job validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::job::{JobSpec, OverlapPolicy};
use crate::monitor::{MonitorSettings, RawJobMonitor, RawMonitor};
use crate::schedule::{parse_timezone, RawSchedule};
use crate::script::{RawScript, ScriptSpec};

pub const DEFAULT_CONFIG_FILE: &str = "chief.yaml";

/// The fully validated configuration document.
#[derive(Clone, Debug)]
pub struct ChiefConfig {
    pub jobs: Vec<JobSpec>,
    pub monitor: MonitorSettings,
    pub config_path: PathBuf,
    pub config_dir: PathBuf,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[allow(dead_code)]
    version: Option<serde_yaml::Value>,
    defaults: Option<RawDefaults>,
    monitor: Option<RawMonitor>,
    jobs: Option<Vec<RawJob>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    working_dir: Option<String>,
    stop_on_failure: Option<bool>,
    overlap: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJob {
    name: Option<String>,
    enabled: Option<bool>,
    working_dir: Option<String>,
    stop_on_failure: Option<bool>,
    overlap: Option<String>,
    schedule: Option<RawSchedule>,
    scripts: Option<Vec<RawScript>>,
    monitor: Option<RawJobMonitor>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the daemon host's IANA timezone, falling back to UTC.
pub fn system_timezone() -> (Tz, String) {
    if let Ok(name) = iana_time_zone::get_timezone() {
        if let Ok(tz) = name.parse::<Tz>() {
            return (tz, name);
        }
    }
    if let Ok(name) = std::env::var("TZ") {
        if let Ok(tz) = name.parse::<Tz>() {
            return (tz, name);
        }
    }
    (chrono_tz::UTC, "UTC".to_string())
}

/// Load and validate a configuration document.
pub fn load_config(config_path: &Path) -> Result<ChiefConfig> {
    if !config_path.exists() {
        return Err(Error::config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }
    let text = std::fs::read_to_string(config_path)?;
    let raw: RawConfig = serde_yaml::from_str(&text).map_err(|e| {
        Error::config(format!(
            "Failed to parse YAML in {}: {e}",
            config_path.display()
        ))
    })?;

    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let defaults = raw.defaults.unwrap_or_default();
    let (_, system_tz_name) = system_timezone();
    let default_tz_name = defaults
        .timezone
        .as_deref()
        .unwrap_or(&system_tz_name)
        .to_string();
    parse_timezone(&default_tz_name, "defaults.timezone")?;

    let default_working_dir = resolve_working_dir(
        defaults.working_dir.as_deref().unwrap_or("."),
        &config_dir,
        "defaults.working_dir",
    )?;
    let default_stop_on_failure = defaults.stop_on_failure.unwrap_or(true);
    let default_overlap = OverlapPolicy::parse(
        defaults.overlap.as_deref(),
        "defaults.overlap",
        OverlapPolicy::Skip,
    )?;

    let monitor = match &raw.monitor {
        Some(raw_monitor) => raw_monitor.resolve("monitor", &config_dir)?,
        None => MonitorSettings::disabled(&config_dir),
    };

    let raw_jobs = raw.jobs.unwrap_or_default();
    if raw_jobs.is_empty() {
        return Err(Error::config("jobs must be a non-empty list.".to_string()));
    }

    let mut seen_names: HashSet<String> = HashSet::new();
    let mut jobs = Vec::with_capacity(raw_jobs.len());
    for (idx, raw_job) in raw_jobs.iter().enumerate() {
        let field = format!("jobs[{idx}]");

        let name = raw_job
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::config(format!("{field}.name must be a non-empty string.")))?
            .to_string();
        if !seen_names.insert(name.clone()) {
            return Err(Error::config(format!("Duplicate job name \"{name}\".")));
        }

        let working_dir = match raw_job.working_dir.as_deref() {
            Some(dir) => resolve_working_dir(dir, &config_dir, &format!("{field}.working_dir"))?,
            None => default_working_dir.clone(),
        };

        let schedule_raw = raw_job
            .schedule
            .as_ref()
            .ok_or_else(|| Error::config(format!("{field}.schedule must be a mapping.")))?;
        let schedule = schedule_raw.resolve(&format!("{field}.schedule"), &default_tz_name)?;

        let scripts = parse_scripts(
            raw_job.scripts.as_deref(),
            &format!("{field}.scripts"),
            &working_dir,
        )?;

        let job_monitor = raw_job
            .monitor
            .clone()
            .unwrap_or_default()
            .resolve(&format!("{field}.monitor"), &monitor)?;

        jobs.push(JobSpec {
            name,
            enabled: raw_job.enabled.unwrap_or(true),
            working_dir,
            stop_on_failure: raw_job.stop_on_failure.unwrap_or(default_stop_on_failure),
            overlap: OverlapPolicy::parse(
                raw_job.overlap.as_deref(),
                &format!("{field}.overlap"),
                default_overlap,
            )?,
            scripts,
            schedule,
            monitor: job_monitor,
        });
    }

    Ok(ChiefConfig {
        jobs,
        monitor,
        config_path,
        config_dir,
    })
}

fn resolve_working_dir(value: &str, config_dir: &Path, field: &str) -> Result<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::config(format!(
            "{field} must be a non-empty path string."
        )));
    }
    let raw = PathBuf::from(trimmed);
    let resolved = if raw.is_absolute() {
        raw
    } else {
        config_dir.join(raw)
    };
    let resolved = resolved.canonicalize().map_err(|_| {
        Error::config(format!(
            "working directory does not exist at {field}: {}",
            resolved.display()
        ))
    })?;
    if !resolved.is_dir() {
        return Err(Error::config(format!(
            "working directory does not exist at {field}: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn parse_scripts(
    raw: Option<&[RawScript]>,
    field: &str,
    working_dir: &Path,
) -> Result<Vec<ScriptSpec>> {
    let raw = raw.unwrap_or_default();
    if raw.is_empty() {
        return Err(Error::config(format!("{field} must be a non-empty list.")));
    }
    raw.iter()
        .enumerate()
        .map(|(idx, script)| script.resolve(&format!("{field}[{idx}]"), working_dir))
        .collect()
}
