//! `preview` — human-readable schedule summary plus the next N fire times.

use std::path::PathBuf;

use chrono::Utc;

use chief_domain::error::{Error, Result};
use chief_scheduler::{next_run_times, ScheduleKind};

use crate::cli::{filter_jobs, load_runtimes};

const BANNER: &str =
    "================================================================================";

pub fn preview(config_path: &PathBuf, job: Option<&str>, count: usize) -> Result<i32> {
    if count == 0 {
        return Err(Error::Other("--count must be >= 1".to_string()));
    }
    let (_, runtimes) = load_runtimes(config_path)?;
    let selected = filter_jobs(&runtimes, job, true)?;
    let now = Utc::now();

    for rt in &selected {
        let spec = &rt.spec;
        let compiled = &rt.compiled;
        println!("{BANNER}");
        println!("Job: {} (enabled={})", spec.name, spec.enabled);
        println!("{}", compiled.description);
        println!("Schedule mode: {}", compiled.kind.as_str());
        match compiled.cron_expr() {
            Some(expr) if compiled.kind == ScheduleKind::Hybrid => {
                println!("Cron trigger + runtime guard: {expr}")
            }
            Some(expr) => println!("Cron equivalent: {expr}"),
            None => println!("Cron equivalent: runtime-only"),
        }
        if let Some(start) = compiled.start {
            println!("Start bound: {}", start.to_rfc3339());
        }
        if let Some(end) = compiled.end {
            println!("End bound: {}", end.to_rfc3339());
        }
        if !compiled.exclude.is_empty() {
            let listed: Vec<String> = compiled.exclude.iter().map(|d| d.to_string()).collect();
            println!("Exclude dates: {}", listed.join(", "));
        }
        println!("Scripts:");
        for script in &spec.scripts {
            let args_text = if script.args.is_empty() {
                "(none)".to_string()
            } else {
                script
                    .args
                    .iter()
                    .map(|arg| quote(arg))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            println!(
                "- {} | timeout={}s | args={args_text}",
                script.path, script.timeout_seconds
            );
        }
        println!("Next {count} run(s):");
        let runs = next_run_times(compiled, count, now);
        if runs.is_empty() {
            println!("- none");
        }
        for run in runs {
            println!("- {}", run.with_timezone(&compiled.tz).to_rfc3339());
        }
    }
    println!("{BANNER}");
    Ok(0)
}

pub(crate) fn quote(arg: &str) -> String {
    shlex::try_quote(arg)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| arg.to_string())
}
