//! Worker-facing telemetry client.
//!
//! Child scripts receive their identity through the `CHIEF_*` environment
//! overlay; this client reads it back and posts single events to the
//! monitor service. Every method returns a plain success flag and never
//! fails the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::event::{Level, MonitorEvent, SOURCE_WORKER};

pub const ENV_RUN_ID: &str = "CHIEF_RUN_ID";
pub const ENV_JOB_NAME: &str = "CHIEF_JOB_NAME";
pub const ENV_SCRIPT_PATH: &str = "CHIEF_SCRIPT_PATH";
pub const ENV_SCHEDULED_FOR: &str = "CHIEF_SCHEDULED_FOR";
pub const ENV_MONITOR_ENDPOINT: &str = "CHIEF_MONITOR_ENDPOINT";
pub const ENV_MONITOR_API_KEY: &str = "CHIEF_MONITOR_API_KEY";

pub const DEFAULT_TIMEOUT_MS: u64 = 400;

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

/// Identity propagated from the scheduler into the worker environment.
#[derive(Clone, Debug, Default)]
pub struct WorkerContext {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub run_id: Option<String>,
    pub job_name: Option<String>,
    pub script_path: Option<String>,
    pub scheduled_for: Option<String>,
}

impl WorkerContext {
    pub fn from_env() -> Self {
        Self {
            endpoint: env_var(ENV_MONITOR_ENDPOINT),
            api_key: env_var(ENV_MONITOR_API_KEY),
            run_id: env_var(ENV_RUN_ID),
            job_name: env_var(ENV_JOB_NAME),
            script_path: env_var(ENV_SCRIPT_PATH),
            scheduled_for: env_var(ENV_SCHEDULED_FOR),
        }
    }
}

/// Posts `worker.message` events to `<endpoint>/v1/events`.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    http: Option<reqwest::Client>,
    context: WorkerContext,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl WorkerClient {
    /// Client configured entirely from the environment overlay.
    pub fn from_env() -> Self {
        Self::with_overrides(None, None, DEFAULT_TIMEOUT_MS)
    }

    /// Explicit endpoint/api-key override; environment fills the gaps.
    pub fn with_overrides(
        endpoint: Option<String>,
        api_key: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        let context = WorkerContext::from_env();
        let endpoint = non_empty(endpoint).or_else(|| context.endpoint.clone());
        let api_key = non_empty(api_key).or_else(|| context.api_key.clone());
        let timeout_ms = if timeout_ms > 0 {
            timeout_ms
        } else {
            DEFAULT_TIMEOUT_MS
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .ok();
        Self {
            http,
            context,
            endpoint,
            api_key,
        }
    }

    /// True when an endpoint is known; otherwise every post returns false.
    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn debug(
        &self,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.post(Level::Debug, message, metadata).await
    }

    pub async fn info(
        &self,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.post(Level::Info, message, metadata).await
    }

    pub async fn warn(
        &self,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.post(Level::Warn, message, metadata).await
    }

    pub async fn error(
        &self,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.post(Level::Error, message, metadata).await
    }

    pub async fn critical(
        &self,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.post(Level::Critical, message, metadata).await
    }

    async fn post(
        &self,
        level: Level,
        message: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let (Some(endpoint), Some(http)) = (&self.endpoint, &self.http) else {
            return false;
        };
        let message = message.trim();
        if message.is_empty() {
            return false;
        }

        let mut event = MonitorEvent::new("worker.message", level, message);
        event.source_type = SOURCE_WORKER.to_string();
        event.metadata = metadata;
        event.job_name = self.context.job_name.clone();
        event.script_path = self.context.script_path.clone();
        event.run_id = self.context.run_id.clone();
        event.scheduled_for = self
            .context
            .scheduled_for
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let url = format!("{}/v1/events", endpoint.trim_end_matches('/'));
        let mut request = http.post(&url).json(&event);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
