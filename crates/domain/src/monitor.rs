//! Monitor settings — global emitter configuration and per-job check
//! parameters.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_MONITOR_ENDPOINT: &str = "http://127.0.0.1:7410";
pub const DEFAULT_MONITOR_TIMEOUT_MS: u64 = 400;
pub const DEFAULT_BUFFER_MAX_EVENTS: usize = 5000;
pub const DEFAULT_BUFFER_FLUSH_MS: u64 = 1000;
pub const DEFAULT_SPOOL_FILE: &str = ".chief/telemetry_spool.jsonl";
pub const DEFAULT_CHECK_GRACE_SECONDS: u64 = 120;

/// In-memory buffering and on-disk spool parameters for the emitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferSettings {
    pub max_events: usize,
    pub flush_interval_ms: u64,
    pub spool_file: PathBuf,
}

/// Global telemetry emitter settings (`monitor:` top-level mapping).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub buffer: BufferSettings,
}

impl MonitorSettings {
    /// Settings used when the config has no `monitor:` mapping.
    pub fn disabled(config_dir: &Path) -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_MONITOR_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout_ms: DEFAULT_MONITOR_TIMEOUT_MS,
            buffer: BufferSettings {
                max_events: DEFAULT_BUFFER_MAX_EVENTS,
                flush_interval_ms: DEFAULT_BUFFER_FLUSH_MS,
                spool_file: config_dir.join(DEFAULT_SPOOL_FILE),
            },
        }
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }
}

/// Per-job miss/failure alerting parameters, forwarded to the monitor
/// service as event metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckSettings {
    pub enabled: bool,
    pub grace_seconds: u64,
    pub alert_on_failure: bool,
    pub alert_on_miss: bool,
}

/// Per-job monitor settings (`monitor:` under a job).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobMonitorSettings {
    pub enabled: bool,
    pub check: CheckSettings,
}

impl JobMonitorSettings {
    pub fn defaulted(enabled: bool) -> Self {
        Self {
            enabled,
            check: CheckSettings {
                enabled,
                grace_seconds: DEFAULT_CHECK_GRACE_SECONDS,
                alert_on_failure: true,
                alert_on_miss: true,
            },
        }
    }

    /// Check settings as event metadata, attached to job lifecycle events.
    pub fn check_metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("check_enabled".into(), self.check.enabled.into());
        map.insert("grace_seconds".into(), self.check.grace_seconds.into());
        map.insert("alert_on_failure".into(), self.check.alert_on_failure.into());
        map.insert("alert_on_miss".into(), self.check.alert_on_miss.into());
        map
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw mappings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMonitor {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<i64>,
    pub buffer: Option<RawBuffer>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBuffer {
    pub max_events: Option<i64>,
    pub flush_interval_ms: Option<i64>,
    pub spool_file: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobMonitor {
    pub enabled: Option<bool>,
    pub check: Option<RawCheck>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCheck {
    pub enabled: Option<bool>,
    pub grace_seconds: Option<i64>,
    pub alert_on_failure: Option<bool>,
    pub alert_on_miss: Option<bool>,
}

fn positive(value: Option<i64>, field: &str, default: u64) -> Result<u64> {
    match value {
        None => Ok(default),
        Some(v) if v >= 1 => Ok(v as u64),
        Some(_) => Err(Error::config(format!("{field} must be >= 1."))),
    }
}

impl RawMonitor {
    pub fn resolve(&self, field: &str, config_dir: &Path) -> Result<MonitorSettings> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_MONITOR_ENDPOINT)
            .to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "{field}.endpoint must be an HTTP URL."
            )));
        }

        let buffer = self.buffer.clone().unwrap_or_default();
        let spool_raw = buffer
            .spool_file
            .as_deref()
            .map(str::trim)
            .unwrap_or(DEFAULT_SPOOL_FILE);
        if spool_raw.is_empty() {
            return Err(Error::config(format!(
                "{field}.buffer.spool_file must be a non-empty path string."
            )));
        }
        let spool_path = PathBuf::from(spool_raw);
        let spool_file = if spool_path.is_absolute() {
            spool_path
        } else {
            config_dir.join(spool_path)
        };

        Ok(MonitorSettings {
            enabled: self.enabled.unwrap_or(false),
            endpoint,
            api_key: self.api_key.clone().unwrap_or_default(),
            timeout_ms: positive(
                self.timeout_ms,
                &format!("{field}.timeout_ms"),
                DEFAULT_MONITOR_TIMEOUT_MS,
            )?,
            buffer: BufferSettings {
                max_events: positive(
                    buffer.max_events,
                    &format!("{field}.buffer.max_events"),
                    DEFAULT_BUFFER_MAX_EVENTS as u64,
                )? as usize,
                flush_interval_ms: positive(
                    buffer.flush_interval_ms,
                    &format!("{field}.buffer.flush_interval_ms"),
                    DEFAULT_BUFFER_FLUSH_MS,
                )?,
                spool_file,
            },
        })
    }
}

impl RawJobMonitor {
    pub fn resolve(&self, field: &str, global: &MonitorSettings) -> Result<JobMonitorSettings> {
        let enabled = self.enabled.unwrap_or(global.enabled);
        let check = self.check.clone().unwrap_or_default();
        let grace_seconds = match check.grace_seconds {
            None => DEFAULT_CHECK_GRACE_SECONDS,
            Some(v) if v >= 0 => v as u64,
            Some(_) => {
                return Err(Error::config(format!(
                    "{field}.check.grace_seconds must be >= 0."
                )))
            }
        };
        Ok(JobMonitorSettings {
            enabled,
            check: CheckSettings {
                enabled: check.enabled.unwrap_or(enabled),
                grace_seconds,
                alert_on_failure: check.alert_on_failure.unwrap_or(true),
                alert_on_miss: check.alert_on_miss.unwrap_or(true),
            },
        })
    }
}
