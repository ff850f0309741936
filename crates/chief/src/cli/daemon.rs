//! `daemon` — long-lived scheduler loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chief_domain::error::{Error, Result};
use chief_monitor::MonitorEmitter;

use crate::cli::{effective_monitor_settings, filter_jobs, load_runtimes};
use crate::runtime::Dispatcher;

pub async fn daemon(config_path: &PathBuf, poll_seconds: u64) -> Result<i32> {
    if poll_seconds == 0 {
        return Err(Error::Other("--poll-seconds must be >= 1".to_string()));
    }
    let (config, runtimes) = load_runtimes(config_path)?;
    let selected = filter_jobs(&runtimes, None, false)?;
    let settings = effective_monitor_settings(&config.monitor, &selected);
    let emitter = Arc::new(MonitorEmitter::new(settings));

    let dispatcher = Dispatcher::new(selected, emitter);
    Ok(dispatcher.run(Duration::from_secs(poll_seconds)).await)
}
