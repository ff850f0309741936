//! `export-cron` — render enabled jobs as crontab blocks.
//!
//! Runtime-only schedules have no five-field equivalent and export as a
//! comment; hybrid schedules carry a NOTE that the guard still applies.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use chief_domain::error::Result;
use chief_scheduler::{JobRuntime, ScheduleKind};

use crate::cli::preview::quote;
use crate::cli::{filter_jobs, load_runtimes};

pub fn export_cron(config_path: &PathBuf, job: Option<&str>) -> Result<i32> {
    let (config, runtimes) = load_runtimes(config_path)?;
    let selected = filter_jobs(&runtimes, job, false)?;
    let self_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "chief".to_string());
    let config_abs = config.config_path.display().to_string();
    print!("{}", render_export(&selected, &self_path, &config_abs));
    Ok(0)
}

/// Build the complete crontab text for the selected jobs.
pub fn render_export(selected: &[Arc<JobRuntime>], self_path: &str, config_abs: &str) -> String {
    let mut out = String::new();
    out.push_str("# chief cron export\n");
    out.push_str(&format!("# generated_at={}\n", Utc::now().to_rfc3339()));
    for rt in selected {
        let compiled = &rt.compiled;
        let name = &rt.spec.name;
        out.push('\n');
        out.push_str(&format!("# job: {name}\n"));
        out.push_str(&format!("# mode: {}\n", compiled.kind.as_str()));
        out.push_str(&format!("CRON_TZ={}\n", compiled.tz_name));
        let Some(expr) = compiled.cron_expr() else {
            out.push_str(&format!(
                "# runtime-only schedule ({}); no cron equivalent.\n",
                compiled.description
            ));
            continue;
        };
        if compiled.kind == ScheduleKind::Hybrid {
            out.push_str("# NOTE: runtime guard required (ordinal/exclusion/bounds).\n");
        }
        let command = format!(
            "cd {} && {} run --config {} --job {} --respect-schedule",
            quote(&rt.spec.working_dir.display().to_string()),
            quote(self_path),
            quote(config_abs),
            quote(name)
        );
        out.push_str(&format!("{expr} {command}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chief_domain::job::{JobSpec, OverlapPolicy};
    use chief_domain::monitor::JobMonitorSettings;
    use chief_domain::schedule::RawSchedule;

    fn runtime_with_schedule(name: &str, schedule_yaml: &str) -> Arc<JobRuntime> {
        let raw: RawSchedule = serde_yaml::from_str(schedule_yaml).unwrap();
        let schedule = raw.resolve("schedule", "UTC").unwrap();
        let compiled = chief_scheduler::compile(&schedule).unwrap();
        Arc::new(JobRuntime {
            spec: JobSpec {
                name: name.into(),
                enabled: true,
                working_dir: std::path::PathBuf::from("/opt/jobs"),
                stop_on_failure: true,
                overlap: OverlapPolicy::Skip,
                scripts: Vec::new(),
                schedule,
                monitor: JobMonitorSettings::defaulted(false),
            },
            compiled,
            index: 0,
        })
    }

    #[test]
    fn pure_cron_job_exports_command_line() {
        let rt = runtime_with_schedule(
            "weekly-report",
            "{frequency: weekly, day: friday, time: \"17:30\"}",
        );
        let text = render_export(&[rt], "/usr/bin/chief", "/etc/chief/chief.yaml");
        assert!(text.contains("CRON_TZ=UTC\n"));
        assert!(text.contains(
            "30 17 * * 5 cd /opt/jobs && /usr/bin/chief run --config /etc/chief/chief.yaml \
             --job weekly-report --respect-schedule\n"
        ));
    }

    #[test]
    fn runtime_only_job_exports_comment_without_expression() {
        let rt = runtime_with_schedule("drip", "{frequency: interval, every: 90m}");
        let text = render_export(&[rt], "/usr/bin/chief", "/etc/chief/chief.yaml");
        assert!(text.contains("# mode: runtime_only\n"));
        assert!(text.contains("no cron equivalent."));
        assert!(
            !text.lines().any(|l| l.contains("--respect-schedule")),
            "runtime-only must not emit a cron line"
        );
    }

    #[test]
    fn hybrid_job_carries_guard_note() {
        let rt = runtime_with_schedule(
            "month-end",
            "{frequency: monthly, ordinal: last, day: friday, time: \"18:00\"}",
        );
        let text = render_export(&[rt], "/usr/bin/chief", "/etc/chief/chief.yaml");
        assert!(text.contains("# NOTE: runtime guard required (ordinal/exclusion/bounds).\n"));
        assert!(text.contains("0 18 * * 5 cd /opt/jobs"));
    }
}
