pub mod daemon;
pub mod export_cron;
pub mod preview;
pub mod run;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use chief_domain::config::DEFAULT_CONFIG_FILE;
use chief_domain::error::{Error, Result};
use chief_scheduler::JobRuntime;

pub const DEFAULT_PREVIEW_COUNT: usize = 5;
pub const DEFAULT_POLL_SECONDS: u64 = 10;

/// chief — declarative job scheduler and orchestrator.
#[derive(Debug, Parser)]
#[command(name = "chief", version, about)]
pub struct Cli {
    /// Path to the chief YAML config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the config and compile schedules.
    Validate,
    /// Show a friendly schedule preview with upcoming fire times.
    Preview {
        /// Preview a single job by name.
        #[arg(long)]
        job: Option<String>,
        /// How many upcoming runs to list.
        #[arg(long, default_value_t = DEFAULT_PREVIEW_COUNT)]
        count: usize,
    },
    /// Run jobs once, immediately.
    Run {
        /// Run one job by name.
        #[arg(long)]
        job: Option<String>,
        /// Only run jobs that are due at this minute.
        #[arg(long)]
        respect_schedule: bool,
    },
    /// Run the scheduler daemon loop.
    Daemon {
        /// Polling interval in seconds.
        #[arg(long, default_value_t = DEFAULT_POLL_SECONDS)]
        poll_seconds: u64,
    },
    /// Export cron-compatible schedules.
    ExportCron {
        /// Export one job by name.
        #[arg(long)]
        job: Option<String>,
    },
}

/// Select runtimes by optional name, optionally dropping disabled jobs.
/// Declaration order is preserved.
pub fn filter_jobs(
    runtimes: &[Arc<JobRuntime>],
    job_name: Option<&str>,
    include_disabled: bool,
) -> Result<Vec<Arc<JobRuntime>>> {
    let mut selected: Vec<Arc<JobRuntime>> = match job_name {
        Some(name) => {
            let matched: Vec<_> = runtimes
                .iter()
                .filter(|rt| rt.spec.name == name)
                .cloned()
                .collect();
            if matched.is_empty() {
                return Err(Error::UnknownJob(name.to_string()));
            }
            matched
        }
        None => runtimes.to_vec(),
    };
    if include_disabled {
        return Ok(selected);
    }
    selected.retain(|rt| rt.spec.enabled);
    if selected.is_empty() {
        return Err(Error::NoEnabledJobs);
    }
    Ok(selected)
}

/// Load the config and compile every job, preserving declaration order.
pub fn load_runtimes(config_path: &PathBuf) -> Result<(chief_domain::ChiefConfig, Vec<Arc<JobRuntime>>)> {
    let config = chief_domain::load_config(config_path)?;
    let runtimes = chief_scheduler::compile_jobs(config.jobs.clone())?
        .into_iter()
        .map(Arc::new)
        .collect();
    Ok((config, runtimes))
}

/// The emitter runs whenever the global flag or any selected job opts in.
pub fn effective_monitor_settings(
    settings: &chief_domain::MonitorSettings,
    selected: &[Arc<JobRuntime>],
) -> chief_domain::MonitorSettings {
    let should_enable = settings.enabled || selected.iter().any(|rt| rt.spec.monitor.enabled);
    if should_enable == settings.enabled {
        settings.clone()
    } else {
        settings.with_enabled(should_enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_for_preview_and_daemon() {
        let cli = Cli::parse_from(["chief", "preview"]);
        match cli.command {
            Command::Preview { count, job } => {
                assert_eq!(count, 5);
                assert!(job.is_none());
            }
            _ => panic!("expected preview"),
        }
        let cli = Cli::parse_from(["chief", "daemon"]);
        match cli.command {
            Command::Daemon { poll_seconds } => assert_eq!(poll_seconds, 10),
            _ => panic!("expected daemon"),
        }
    }

    #[test]
    fn global_config_flag_applies_after_subcommand() {
        let cli = Cli::parse_from(["chief", "run", "--config", "/etc/chief/jobs.yaml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/chief/jobs.yaml"));
    }
}
