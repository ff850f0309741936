use clap::Parser;
use tracing_subscriber::EnvFilter;

use chief::cli::{self, Cli, Command};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Validate => cli::validate::validate(&cli.config),
        Command::Preview { job, count } => {
            cli::preview::preview(&cli.config, job.as_deref(), *count)
        }
        Command::Run {
            job,
            respect_schedule,
        } => cli::run::run(&cli.config, job.as_deref(), *respect_schedule).await,
        Command::Daemon { poll_seconds } => cli::daemon::daemon(&cli.config, *poll_seconds).await,
        Command::ExportCron { job } => cli::export_cron::export_cron(&cli.config, job.as_deref()),
    };
    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
