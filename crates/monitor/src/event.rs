//! Telemetry event model. Serializes to the monitor wire schema
//! (camelCase keys, absent optionals omitted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOURCE_CHIEF: &str = "chief";
pub const SOURCE_WORKER: &str = "worker";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// One telemetry event as posted to the monitor service.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub source_type: String,
    pub event_type: String,
    pub level: Level,
    pub message: String,
    pub event_at: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl MonitorEvent {
    /// A chief-sourced event stamped with the current instant.
    pub fn new(event_type: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        Self {
            source_type: SOURCE_CHIEF.to_string(),
            event_type: event_type.into(),
            level,
            message: message.into(),
            event_at: Utc::now(),
            metadata: serde_json::Map::new(),
            job_name: None,
            script_path: None,
            run_id: None,
            scheduled_for: None,
            success: None,
            return_code: None,
            duration_ms: None,
        }
    }

    pub fn with_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_script(mut self, script_path: impl Into<String>) -> Self {
        self.script_path = Some(script_path.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_scheduled_for(mut self, scheduled_for: Option<DateTime<Utc>>) -> Self {
        self.scheduled_for = scheduled_for;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_return_code(mut self, return_code: i32) -> Self {
        self.return_code = Some(return_code);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payload_uses_camel_case_keys() {
        let event = MonitorEvent::new("job.started", Level::Info, "Job nightly started.")
            .with_job("nightly")
            .with_run_id("nightly:20260101000000-000001-42")
            .with_success(true)
            .with_return_code(0)
            .with_duration_ms(1500);
        let payload = event.to_payload();
        assert_eq!(payload["sourceType"], "chief");
        assert_eq!(payload["eventType"], "job.started");
        assert_eq!(payload["level"], "INFO");
        assert_eq!(payload["jobName"], "nightly");
        assert_eq!(payload["runId"], "nightly:20260101000000-000001-42");
        assert_eq!(payload["returnCode"], 0);
        assert_eq!(payload["durationMs"], 1500);
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let payload = MonitorEvent::new("job.completed", Level::Info, "done").to_payload();
        let map = payload.as_object().unwrap();
        assert!(!map.contains_key("jobName"));
        assert!(!map.contains_key("scriptPath"));
        assert!(!map.contains_key("scheduledFor"));
        assert!(!map.contains_key("success"));
        assert!(map.contains_key("metadata"));
    }

    #[test]
    fn event_at_serializes_as_utc_iso8601() {
        let mut event = MonitorEvent::new("job.started", Level::Info, "x");
        event.event_at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let payload = event.to_payload();
        let text = payload["eventAt"].as_str().unwrap();
        assert!(text.starts_with("2026-01-01T09:00:00"), "{text}");
    }

    #[test]
    fn levels_render_uppercase() {
        for (level, expected) in [
            (Level::Debug, "\"DEBUG\""),
            (Level::Warn, "\"WARN\""),
            (Level::Critical, "\"CRITICAL\""),
        ] {
            assert_eq!(serde_json::to_string(&level).unwrap(), expected);
        }
    }
}
