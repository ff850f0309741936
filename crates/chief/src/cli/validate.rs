//! `validate` — parse the config, compile every schedule, and summarize.

use std::path::PathBuf;

use chief_domain::error::Result;

use crate::cli::load_runtimes;

pub fn validate(config_path: &PathBuf) -> Result<i32> {
    let (config, runtimes) = load_runtimes(config_path)?;
    let enabled = runtimes.iter().filter(|rt| rt.spec.enabled).count();
    println!("Config valid: {}", config.config_path.display());
    println!("Total jobs: {}", runtimes.len());
    println!("Enabled jobs: {enabled}");
    for rt in &runtimes {
        match rt.compiled.cron_expr() {
            Some(expr) => println!("- {}: {} ({expr})", rt.spec.name, rt.compiled.kind.as_str()),
            None => println!("- {}: {}", rt.spec.name, rt.compiled.kind.as_str()),
        }
    }
    Ok(0)
}
