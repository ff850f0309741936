//! Execution unit — runs a job's script list in order, captures child
//! output, enforces per-script wall-clock limits, and emits telemetry at
//! every lifecycle step.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use chief_domain::job::{JobRunResult, JobSpec, ScriptError, ScriptRunResult};
use chief_domain::monitor::MonitorSettings;
use chief_domain::script::ScriptSpec;
use chief_monitor::event::{Level, MonitorEvent};
use chief_monitor::worker::{
    ENV_JOB_NAME, ENV_MONITOR_API_KEY, ENV_MONITOR_ENDPOINT, ENV_RUN_ID, ENV_SCHEDULED_FOR,
    ENV_SCRIPT_PATH,
};
use chief_monitor::MonitorEmitter;
use chief_scheduler::{next_run_after, JobRuntime};

/// Hard cap on captured bytes per output stream; the child keeps writing,
/// we just stop keeping it.
const STREAM_CAPTURE_LIMIT: usize = 100_000;
/// Event metadata previews carry only the head of each stream.
const PREVIEW_LIMIT: usize = 1_000;

/// Unique id for one job invocation:
/// `<job>:<yyyymmddHHMMSS>-<microseconds>-<pid>`.
pub fn make_run_id(job_name: &str, started: DateTime<Utc>) -> String {
    format!(
        "{}:{}-{:06}-{}",
        job_name,
        started.format("%Y%m%d%H%M%S"),
        started.timestamp_subsec_micros(),
        std::process::id()
    )
}

/// Environment overlay handed to every child script.
pub fn build_worker_env(
    script: &ScriptSpec,
    spec: &JobSpec,
    run_id: &str,
    scheduled_for: Option<DateTime<Utc>>,
    monitor: Option<&MonitorSettings>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert(ENV_RUN_ID.to_string(), run_id.to_string());
    env.insert(ENV_JOB_NAME.to_string(), spec.name.clone());
    env.insert(
        ENV_SCRIPT_PATH.to_string(),
        script.resolved_path.display().to_string(),
    );
    if let Some(scheduled_for) = scheduled_for {
        env.insert(ENV_SCHEDULED_FOR.to_string(), scheduled_for.to_rfc3339());
    }
    if let Some(monitor) = monitor {
        env.insert(ENV_MONITOR_ENDPOINT.to_string(), monitor.endpoint.clone());
        if !monitor.api_key.is_empty() {
            env.insert(ENV_MONITOR_API_KEY.to_string(), monitor.api_key.clone());
        }
    }
    env
}

/// Read a child stream to EOF, keeping at most `STREAM_CAPTURE_LIMIT`
/// bytes. Draining continues past the cap so the child never blocks on a
/// full pipe.
async fn capture_stream<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut captured: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if captured.len() < STREAM_CAPTURE_LIMIT {
                    let take = n.min(STREAM_CAPTURE_LIMIT - captured.len());
                    captured.extend_from_slice(&buf[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

fn failure_result(
    script: &ScriptSpec,
    started: DateTime<Utc>,
    return_code: i32,
    error: ScriptError,
    stderr: String,
) -> ScriptRunResult {
    ScriptRunResult {
        script: script.clone(),
        success: false,
        return_code,
        duration: Utc::now() - started,
        stdout: String::new(),
        stderr,
        error: Some(error),
    }
}

/// Execute one script with the merged environment, capturing both output
/// streams. Timeout kills the child and reports `return_code = -1`; a
/// spawn failure reports `-2`.
pub async fn run_script(
    script: &ScriptSpec,
    working_dir: &Path,
    env_overlay: &HashMap<String, String>,
) -> ScriptRunResult {
    let started = Utc::now();
    let mut cmd = Command::new(&script.resolved_path);
    cmd.args(&script.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env_overlay {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return failure_result(script, started, -2, ScriptError::Exception, e.to_string())
        }
    };

    let stdout_task = tokio::spawn(capture_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(capture_stream(child.stderr.take()));
    let limit = Duration::from_secs(script.timeout_seconds);

    tokio::select! {
        status = child.wait() => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) => ScriptRunResult {
                    script: script.clone(),
                    success: status.success(),
                    return_code: status.code().unwrap_or(-1),
                    duration: Utc::now() - started,
                    stdout,
                    stderr,
                    error: None,
                },
                Err(e) => failure_result(script, started, -2, ScriptError::Exception, e.to_string()),
            }
        }
        _ = tokio::time::sleep(limit) => {
            let _ = child.kill().await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            failure_result(
                script,
                started,
                -1,
                ScriptError::Timeout,
                format!("Timed out after {} seconds.", script.timeout_seconds),
            )
        }
    }
}

fn preview(text: &str) -> String {
    text.trim().chars().take(PREVIEW_LIMIT).collect()
}

fn emit(emitter: Option<&MonitorEmitter>, event: MonitorEvent) {
    if let Some(emitter) = emitter {
        emitter.emit(event);
    }
}

/// Run a job's scripts in declaration order, honoring `stop_on_failure`,
/// and emit the job lifecycle event sequence.
pub async fn run_job(
    runtime: &JobRuntime,
    scheduled_for: Option<DateTime<Utc>>,
    emitter: &MonitorEmitter,
) -> JobRunResult {
    let spec = &runtime.spec;
    let started = Utc::now();
    let run_id = make_run_id(&spec.name, started);

    let job_emitter = (emitter.settings().enabled && spec.monitor.enabled).then_some(emitter);
    let monitor_settings = job_emitter.map(|e| e.settings());
    let check_meta = spec.monitor.check_metadata();

    match scheduled_for {
        Some(scheduled_for) => tracing::info!(
            run_id = %run_id,
            job = %spec.name,
            scheduled_for = %scheduled_for.with_timezone(&runtime.compiled.tz).to_rfc3339(),
            "starting job"
        ),
        None => tracing::info!(run_id = %run_id, job = %spec.name, "starting job"),
    }

    let mut started_meta = serde_json::Map::new();
    started_meta.insert("overlap".into(), spec.overlap.as_str().into());
    started_meta.insert("script_count".into(), spec.scripts.len().into());
    started_meta.extend(check_meta.clone());
    emit(
        job_emitter,
        MonitorEvent::new(
            "job.started",
            Level::Info,
            format!("Job {} started.", spec.name),
        )
        .with_job(&spec.name)
        .with_run_id(&run_id)
        .with_scheduled_for(scheduled_for)
        .with_metadata(started_meta),
    );

    let mut script_results: Vec<ScriptRunResult> = Vec::new();
    let total = spec.scripts.len();
    for (idx, script) in spec.scripts.iter().enumerate() {
        let ordinal = idx + 1;
        tracing::info!(
            run_id = %run_id,
            script = %script.path,
            "running script {ordinal}/{total}"
        );
        if !script.args.is_empty() {
            tracing::info!(run_id = %run_id, args = %script.args.join(" "), "script args");
        }

        let mut meta = serde_json::Map::new();
        meta.insert("script_index".into(), ordinal.into());
        meta.insert("script_total".into(), total.into());
        meta.insert("args".into(), script.args.clone().into());
        meta.insert("timeout_seconds".into(), script.timeout_seconds.into());
        emit(
            job_emitter,
            MonitorEvent::new(
                "script.started",
                Level::Info,
                format!("Script started: {}", script.path),
            )
            .with_job(&spec.name)
            .with_script(script.resolved_path.display().to_string())
            .with_run_id(&run_id)
            .with_scheduled_for(scheduled_for)
            .with_metadata(meta),
        );

        let env = build_worker_env(script, spec, &run_id, scheduled_for, monitor_settings);
        let result = run_script(script, &spec.working_dir, &env).await;

        let mut meta = serde_json::Map::new();
        meta.insert(
            "error".into(),
            match result.error {
                Some(tag) => tag.as_str().into(),
                None => serde_json::Value::Null,
            },
        );
        meta.insert("stdout_preview".into(), preview(&result.stdout).into());
        meta.insert("stderr_preview".into(), preview(&result.stderr).into());
        let (level, message) = if result.success {
            (Level::Info, format!("Script completed: {}", script.path))
        } else {
            (
                Level::Error,
                format!(
                    "Script failed: {} (code={})",
                    script.path, result.return_code
                ),
            )
        };
        emit(
            job_emitter,
            MonitorEvent::new("script.completed", level, message)
                .with_job(&spec.name)
                .with_script(script.resolved_path.display().to_string())
                .with_run_id(&run_id)
                .with_scheduled_for(scheduled_for)
                .with_success(result.success)
                .with_return_code(result.return_code)
                .with_duration_ms(result.duration_ms())
                .with_metadata(meta),
        );

        if result.success {
            tracing::info!(
                run_id = %run_id,
                script = %script.path,
                duration_ms = result.duration_ms(),
                "script succeeded"
            );
        } else {
            tracing::error!(
                run_id = %run_id,
                script = %script.path,
                code = result.return_code,
                duration_ms = result.duration_ms(),
                "script failed"
            );
            if !result.stderr.is_empty() {
                tracing::error!(run_id = %run_id, stderr = %result.stderr.trim(), "script stderr");
            }
        }

        let failed = !result.success;
        script_results.push(result);
        if failed && spec.stop_on_failure {
            tracing::error!(run_id = %run_id, "stop_on_failure set; aborting remaining scripts");
            break;
        }
    }

    let ended = Utc::now();
    let success = script_results.iter().all(|r| r.success);
    let failed_script = script_results
        .iter()
        .find(|r| !r.success)
        .map(|r| r.script.path.clone());

    let mut meta = serde_json::Map::new();
    meta.insert("scripts_executed".into(), script_results.len().into());
    meta.insert("scripts_total".into(), total.into());
    meta.insert("stop_on_failure".into(), spec.stop_on_failure.into());
    meta.insert(
        "failed_script".into(),
        match &failed_script {
            Some(path) => path.clone().into(),
            None => serde_json::Value::Null,
        },
    );
    meta.extend(check_meta.clone());
    let (event_type, level, message) = if success {
        (
            "job.completed",
            Level::Info,
            format!("Job {} completed successfully.", spec.name),
        )
    } else {
        ("job.failed", Level::Error, format!("Job {} failed.", spec.name))
    };
    emit(
        job_emitter,
        MonitorEvent::new(event_type, level, message)
            .with_job(&spec.name)
            .with_run_id(&run_id)
            .with_scheduled_for(scheduled_for)
            .with_success(success)
            .with_duration_ms((ended - started).num_milliseconds())
            .with_metadata(meta),
    );
    tracing::info!(
        run_id = %run_id,
        job = %spec.name,
        success,
        duration_ms = (ended - started).num_milliseconds(),
        "job finished"
    );

    emit_next_scheduled(runtime, job_emitter, &run_id, scheduled_for, &check_meta, ended);

    JobRunResult {
        job_name: spec.name.clone(),
        success,
        script_results,
        started_at: started,
        ended_at: ended,
        scheduled_for,
    }
}

/// Compute and announce the fire instant that follows this run. A missing
/// next fire (bounds exhausted, schedule ended) is reported with a null
/// `next_run_at` rather than failing the job.
fn emit_next_scheduled(
    runtime: &JobRuntime,
    job_emitter: Option<&MonitorEmitter>,
    run_id: &str,
    scheduled_for: Option<DateTime<Utc>>,
    check_meta: &serde_json::Map<String, serde_json::Value>,
    ended: DateTime<Utc>,
) {
    let spec = &runtime.spec;
    let next = next_run_after(&runtime.compiled, ended);
    let next_iso = next.map(|n| n.to_rfc3339());
    match next {
        Some(next) => tracing::info!(
            run_id = %run_id,
            job = %spec.name,
            next_run = %next.with_timezone(&runtime.compiled.tz).to_rfc3339(),
            tz = %runtime.compiled.tz_name,
            "next scheduled run"
        ),
        None => tracing::info!(
            run_id = %run_id,
            job = %spec.name,
            "no next scheduled run (outside bounds/exclusions or schedule ended)"
        ),
    }

    let mut meta = serde_json::Map::new();
    meta.insert(
        "next_run_at".into(),
        match &next_iso {
            Some(iso) => iso.clone().into(),
            None => serde_json::Value::Null,
        },
    );
    meta.extend(check_meta.clone());
    let message = match &next_iso {
        Some(iso) => format!("Next run for {}: {iso}", spec.name),
        None => format!("Next run for {}: none", spec.name),
    };
    emit(
        job_emitter,
        MonitorEvent::new("job.next_scheduled", Level::Info, message)
            .with_job(&spec.name)
            .with_run_id(run_id)
            .with_scheduled_for(scheduled_for)
            .with_metadata(meta),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chief_domain::job::OverlapPolicy;
    use chief_domain::monitor::JobMonitorSettings;
    use chief_domain::schedule::RawSchedule;
    use chief_domain::script::RawScript;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> ScriptSpec {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        RawScript {
            path: Some(name.to_string()),
            args: None,
            timeout: Some(5),
        }
        .resolve("scripts[0]", dir)
        .unwrap()
    }

    fn job_with_scripts(dir: &Path, scripts: Vec<ScriptSpec>, stop_on_failure: bool) -> JobRuntime {
        let raw: RawSchedule =
            serde_yaml::from_str("{frequency: daily, time: \"06:00\", timezone: UTC}").unwrap();
        let schedule = raw.resolve("schedule", "UTC").unwrap();
        let compiled = chief_scheduler::compile(&schedule).unwrap();
        JobRuntime {
            spec: JobSpec {
                name: "etl".into(),
                enabled: true,
                working_dir: dir.to_path_buf(),
                stop_on_failure,
                overlap: OverlapPolicy::Skip,
                scripts,
                schedule,
                monitor: JobMonitorSettings::defaulted(false),
            },
            compiled,
            index: 0,
        }
    }

    fn disabled_emitter() -> MonitorEmitter {
        MonitorEmitter::new(chief_domain::MonitorSettings::disabled(Path::new("/tmp")))
    }

    #[test]
    fn run_id_has_expected_shape() {
        let started = Utc::now();
        let id = make_run_id("nightly", started);
        assert!(id.starts_with("nightly:"));
        let tail = id.strip_prefix("nightly:").unwrap();
        let parts: Vec<&str> = tail.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 14);
        assert_eq!(parts[1].len(), 6);
    }

    #[test]
    fn worker_env_includes_identity_and_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");
        let runtime = job_with_scripts(dir.path(), vec![script.clone()], true);
        let settings = chief_domain::MonitorSettings::disabled(dir.path()).with_enabled(true);
        let scheduled = Utc::now();
        let env = build_worker_env(
            &script,
            &runtime.spec,
            "etl:x",
            Some(scheduled),
            Some(&settings),
        );
        assert_eq!(env[ENV_RUN_ID], "etl:x");
        assert_eq!(env[ENV_JOB_NAME], "etl");
        assert!(env.contains_key(ENV_SCHEDULED_FOR));
        assert_eq!(env[ENV_MONITOR_ENDPOINT], settings.endpoint);
        assert!(!env.contains_key(ENV_MONITOR_API_KEY), "empty key omitted");
    }

    #[tokio::test]
    async fn successful_script_reports_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "#!/bin/sh\necho hello\nexit 0\n");
        let result = run_script(&script, dir.path(), &HashMap::new()).await;
        assert!(result.success);
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn failing_script_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "#!/bin/sh\necho oops >&2\nexit 3\n");
        let result = run_script(&script, dir.path(), &HashMap::new()).await;
        assert!(!result.success);
        assert_eq!(result.return_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn timeout_kills_child_and_tags_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.sh");
        std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        let script = RawScript {
            path: Some("slow.sh".into()),
            args: None,
            timeout: Some(1),
        }
        .resolve("scripts[0]", dir.path())
        .unwrap();
        let result = run_script(&script, dir.path(), &HashMap::new()).await;
        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.error, Some(ScriptError::Timeout));
        assert!(result.stderr.contains("Timed out after 1 seconds."));
    }

    #[tokio::test]
    async fn stop_on_failure_halts_remaining_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_script(dir.path(), "a.sh", "#!/bin/sh\nexit 0\n");
        let b = write_script(dir.path(), "b.sh", "#!/bin/sh\nexit 1\n");
        let c = write_script(dir.path(), "c.sh", "#!/bin/sh\ntouch ran_c\nexit 0\n");
        let runtime = job_with_scripts(dir.path(), vec![a, b, c], true);
        let emitter = disabled_emitter();
        let result = run_job(&runtime, None, &emitter).await;
        assert!(!result.success);
        assert_eq!(result.script_results.len(), 2, "C must not execute");
        assert_eq!(result.first_failed_script(), Some("b.sh"));
        assert!(!dir.path().join("ran_c").exists());
    }

    #[tokio::test]
    async fn without_stop_on_failure_all_scripts_run() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_script(dir.path(), "a.sh", "#!/bin/sh\nexit 1\n");
        let b = write_script(dir.path(), "b.sh", "#!/bin/sh\nexit 0\n");
        let runtime = job_with_scripts(dir.path(), vec![a, b], false);
        let emitter = disabled_emitter();
        let result = run_job(&runtime, None, &emitter).await;
        assert!(!result.success, "any failed script fails the job");
        assert_eq!(result.script_results.len(), 2);
    }

    #[tokio::test]
    async fn worker_sees_overlay_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "env.sh",
            "#!/bin/sh\nprintf '%s' \"$CHIEF_JOB_NAME\"\n",
        );
        let runtime = job_with_scripts(dir.path(), vec![script], true);
        let emitter = disabled_emitter();
        let result = run_job(&runtime, None, &emitter).await;
        assert!(result.success);
        assert_eq!(result.script_results[0].stdout, "etl");
    }
}
