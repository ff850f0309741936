//! `run` — execute selected jobs once, optionally only when due.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use chief_domain::error::Result;
use chief_monitor::MonitorEmitter;
use chief_scheduler::is_due_now;

use crate::cli::{effective_monitor_settings, filter_jobs, load_runtimes};
use crate::runtime::run_job;

pub async fn run(config_path: &PathBuf, job: Option<&str>, respect_schedule: bool) -> Result<i32> {
    let (config, runtimes) = load_runtimes(config_path)?;
    let selected = filter_jobs(&runtimes, job, false)?;
    let settings = effective_monitor_settings(&config.monitor, &selected);
    let emitter = Arc::new(MonitorEmitter::new(settings));

    let now = Utc::now();
    let mut exit_code = 0;
    for rt in &selected {
        if respect_schedule && !is_due_now(rt, now) {
            tracing::info!(job = %rt.spec.name, "not due now; skipping");
            continue;
        }
        let result = run_job(rt, None, &emitter).await;
        if !result.success {
            exit_code = 1;
        }
    }
    emitter.close().await;
    Ok(exit_code)
}
