//! Daemon dispatcher — a single-owner poll loop that detects due fire
//! instants, applies overlap policies, launches workers, and collects
//! their completions.
//!
//! All scheduler state (`JobState` map, trigger queue, `active_job`) is
//! owned by the loop; workers communicate back exclusively through the
//! completion channel, so no locking is needed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use chief_domain::job::{JobRunResult, OverlapPolicy};
use chief_monitor::event::{Level, MonitorEvent};
use chief_monitor::MonitorEmitter;
use chief_scheduler::{next_run_after, JobRuntime};

use crate::runtime::executor::run_job;

/// Exit code reported when the daemon stops on interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Per-job mutable daemon state.
#[derive(Clone, Debug)]
pub struct JobState {
    pub next_fire: Option<DateTime<Utc>>,
    pub running_count: u32,
    pub queued_pending: bool,
}

/// A detected due instant awaiting dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerEvent {
    pub job_name: String,
    pub scheduled_for: DateTime<Utc>,
}

pub struct Dispatcher {
    runtimes: Vec<Arc<JobRuntime>>,
    states: HashMap<String, JobState>,
    triggers: VecDeque<TriggerEvent>,
    /// Coarse interlock: only one job *name* may be active at a time;
    /// parallel instances of that same name are still permitted.
    active_job: Option<String>,
    emitter: Arc<MonitorEmitter>,
    completion_tx: mpsc::UnboundedSender<(String, JobRunResult)>,
    completion_rx: mpsc::UnboundedReceiver<(String, JobRunResult)>,
}

impl Dispatcher {
    pub fn new(runtimes: Vec<Arc<JobRuntime>>, emitter: Arc<MonitorEmitter>) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            runtimes,
            states: HashMap::new(),
            triggers: VecDeque::new(),
            active_job: None,
            emitter,
            completion_tx,
            completion_rx,
        }
    }

    fn runtime(&self, name: &str) -> Option<Arc<JobRuntime>> {
        self.runtimes
            .iter()
            .find(|rt| rt.spec.name == name)
            .cloned()
    }

    fn job_emitter(&self, runtime: &JobRuntime) -> Option<&MonitorEmitter> {
        runtime.spec.monitor.enabled.then(|| self.emitter.as_ref())
    }

    /// Seed every job's first fire instant.
    pub fn initialize(&mut self, now: DateTime<Utc>) {
        for rt in &self.runtimes {
            self.states.insert(
                rt.spec.name.clone(),
                JobState {
                    next_fire: next_run_after(&rt.compiled, now),
                    running_count: 0,
                    queued_pending: false,
                },
            );
        }
    }

    /// Drain the completion channel: release run slots, fold queued-one
    /// re-triggers to the *front* of the queue, and release the interlock.
    pub fn drain_completions(&mut self, now: DateTime<Utc>) {
        while let Ok((name, result)) = self.completion_rx.try_recv() {
            let Some(state) = self.states.get_mut(&name) else {
                continue;
            };
            state.running_count = state.running_count.saturating_sub(1);
            tracing::info!(
                job = %name,
                success = result.success,
                running = state.running_count,
                "job worker finished"
            );
            if state.running_count == 0 && state.queued_pending {
                state.queued_pending = false;
                self.triggers.push_front(TriggerEvent {
                    job_name: name.clone(),
                    scheduled_for: now,
                });
                tracing::info!(job = %name, "enqueued queued-pending run");
                if let Some(rt) = self.runtime(&name) {
                    if let Some(emitter) = self.job_emitter(&rt) {
                        emitter.emit(
                            MonitorEvent::new(
                                "daemon.queued_pending",
                                Level::Info,
                                format!("Queued pending run for {name}."),
                            )
                            .with_job(&name)
                            .with_scheduled_for(Some(now))
                            .meta("reason", "prior run completed"),
                        );
                    }
                }
            }
            if self.active_job.as_deref() == Some(name.as_str()) {
                if let Some(state) = self.states.get(&name) {
                    if state.running_count == 0 {
                        self.active_job = None;
                    }
                }
            }
        }
    }

    /// Walk jobs in declaration order; every due fire becomes a trigger
    /// and `next_fire` advances strictly past it (no catch-up).
    pub fn detect_triggers(&mut self, now: DateTime<Utc>) {
        for rt in &self.runtimes {
            let Some(state) = self.states.get_mut(&rt.spec.name) else {
                continue;
            };
            while let Some(next_fire) = state.next_fire {
                if next_fire > now {
                    break;
                }
                self.triggers.push_back(TriggerEvent {
                    job_name: rt.spec.name.clone(),
                    scheduled_for: next_fire,
                });
                state.next_fire =
                    next_run_after(&rt.compiled, next_fire + chrono::Duration::seconds(1));
            }
        }
    }

    /// Scan the trigger queue for dispatchable work until a full pass
    /// makes no progress. The scan (rather than strict FIFO) lets a
    /// queue-policy job with a running instance yield to later entries.
    pub fn dispatch(&mut self) {
        let mut made_progress = true;
        while made_progress {
            made_progress = false;
            for idx in 0..self.triggers.len() {
                let Some(trigger) = self.triggers.get(idx).cloned() else {
                    break;
                };
                let Some(rt) = self.runtime(&trigger.job_name) else {
                    self.triggers.remove(idx);
                    made_progress = true;
                    break;
                };
                let Some(state) = self.states.get(&trigger.job_name) else {
                    continue;
                };

                if state.running_count > 0 {
                    match rt.spec.overlap {
                        OverlapPolicy::Skip => {
                            tracing::info!(
                                job = %rt.spec.name,
                                scheduled_for = %trigger.scheduled_for.to_rfc3339(),
                                "skipping overlapping run"
                            );
                            if let Some(emitter) = self.job_emitter(&rt) {
                                emitter.emit(
                                    MonitorEvent::new(
                                        "daemon.overlap_skipped",
                                        Level::Info,
                                        format!(
                                            "Skipped overlapping trigger for {}.",
                                            rt.spec.name
                                        ),
                                    )
                                    .with_job(&rt.spec.name)
                                    .with_scheduled_for(Some(trigger.scheduled_for))
                                    .meta("overlap", rt.spec.overlap.as_str()),
                                );
                            }
                            self.triggers.remove(idx);
                            made_progress = true;
                            break;
                        }
                        OverlapPolicy::Queue => {
                            if let Some(state) = self.states.get_mut(&trigger.job_name) {
                                if !state.queued_pending {
                                    state.queued_pending = true;
                                    tracing::info!(
                                        job = %rt.spec.name,
                                        "queueing one pending run"
                                    );
                                    if let Some(emitter) = self.job_emitter(&rt) {
                                        emitter.emit(
                                            MonitorEvent::new(
                                                "daemon.queued_pending",
                                                Level::Info,
                                                format!(
                                                    "Queued overlapping trigger for {}.",
                                                    rt.spec.name
                                                ),
                                            )
                                            .with_job(&rt.spec.name)
                                            .with_scheduled_for(Some(trigger.scheduled_for))
                                            .meta("overlap", rt.spec.overlap.as_str()),
                                        );
                                    }
                                }
                            }
                            self.triggers.remove(idx);
                            made_progress = true;
                            break;
                        }
                        OverlapPolicy::Parallel => {
                            let admissible = match self.active_job.as_deref() {
                                None => true,
                                Some(active) => active == rt.spec.name,
                            };
                            if admissible {
                                self.active_job = Some(rt.spec.name.clone());
                                self.launch(rt.clone(), trigger.scheduled_for);
                                self.triggers.remove(idx);
                                made_progress = true;
                                break;
                            }
                            continue;
                        }
                    }
                }

                // Job is idle: dispatch only when the interlock is free or
                // already held by this job name.
                let admissible = match self.active_job.as_deref() {
                    None => true,
                    Some(active) => active == rt.spec.name,
                };
                if !admissible {
                    continue;
                }
                self.active_job = Some(rt.spec.name.clone());
                self.launch(rt.clone(), trigger.scheduled_for);
                self.triggers.remove(idx);
                made_progress = true;
                break;
            }
        }
    }

    /// Start one worker for a trigger and account for it.
    fn launch(&mut self, runtime: Arc<JobRuntime>, scheduled_for: DateTime<Utc>) {
        let running = {
            let Some(state) = self.states.get_mut(&runtime.spec.name) else {
                return;
            };
            state.running_count += 1;
            state.running_count
        };
        tracing::info!(
            job = %runtime.spec.name,
            overlap = runtime.spec.overlap.as_str(),
            running,
            "dispatching job"
        );
        if let Some(emitter) = self.job_emitter(&runtime) {
            let mut meta = serde_json::Map::new();
            meta.insert("overlap".into(), runtime.spec.overlap.as_str().into());
            meta.insert("running_count".into(), running.into());
            meta.extend(runtime.spec.monitor.check_metadata());
            emitter.emit(
                MonitorEvent::new(
                    "daemon.dispatch",
                    Level::Info,
                    format!("Dispatching {}.", runtime.spec.name),
                )
                .with_job(&runtime.spec.name)
                .with_scheduled_for(Some(scheduled_for))
                .with_metadata(meta),
            );
        }

        let emitter = self.emitter.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = run_job(&runtime, Some(scheduled_for), &emitter).await;
            let _ = tx.send((runtime.spec.name.clone(), result));
        });
    }

    /// Drive the poll loop until interrupted; flushes telemetry on the way
    /// out. Outstanding workers are detached.
    pub async fn run(mut self, poll: Duration) -> i32 {
        let now = Utc::now();
        self.initialize(now);
        tracing::info!(
            jobs = self.runtimes.len(),
            poll_seconds = poll.as_secs(),
            "starting daemon"
        );
        loop {
            let now = Utc::now();
            self.drain_completions(now);
            self.detect_triggers(now);
            self.dispatch();
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("daemon interrupted");
                    break;
                }
            }
        }
        self.emitter.close().await;
        EXIT_INTERRUPTED
    }

    #[cfg(test)]
    fn state(&self, name: &str) -> &JobState {
        &self.states[name]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chief_domain::job::JobSpec;
    use chief_domain::monitor::{JobMonitorSettings, MonitorSettings};
    use chief_domain::schedule::RawSchedule;
    use std::path::Path;

    fn runtime_named(name: &str, overlap: OverlapPolicy) -> Arc<JobRuntime> {
        let raw: RawSchedule =
            serde_yaml::from_str("{frequency: daily, time: \"06:00\", timezone: UTC}").unwrap();
        let schedule = raw.resolve("schedule", "UTC").unwrap();
        let compiled = chief_scheduler::compile(&schedule).unwrap();
        Arc::new(JobRuntime {
            spec: JobSpec {
                name: name.into(),
                enabled: true,
                working_dir: std::path::PathBuf::from("."),
                stop_on_failure: true,
                overlap,
                scripts: Vec::new(),
                schedule,
                monitor: JobMonitorSettings::defaulted(false),
            },
            compiled,
            index: 0,
        })
    }

    fn dispatcher(runtimes: Vec<Arc<JobRuntime>>) -> Dispatcher {
        let emitter = Arc::new(MonitorEmitter::new(MonitorSettings::disabled(Path::new(
            "/tmp",
        ))));
        Dispatcher::new(runtimes, emitter)
    }

    fn trigger(name: &str) -> TriggerEvent {
        TriggerEvent {
            job_name: name.into(),
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn initialize_seeds_future_fires() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Skip)]);
        let now = Utc::now();
        d.initialize(now);
        let state = d.state("a");
        assert!(state.next_fire.unwrap() > now);
        assert_eq!(state.running_count, 0);
        assert!(!state.queued_pending);
    }

    #[tokio::test]
    async fn skip_policy_drops_trigger_while_running() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Skip)]);
        d.initialize(Utc::now());
        d.states.get_mut("a").unwrap().running_count = 1;
        d.triggers.push_back(trigger("a"));
        d.dispatch();
        assert!(d.triggers.is_empty());
        assert_eq!(d.state("a").running_count, 1, "no new worker");
    }

    #[tokio::test]
    async fn queue_policy_caps_at_one_pending() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Queue)]);
        d.initialize(Utc::now());
        d.states.get_mut("a").unwrap().running_count = 1;
        d.triggers.push_back(trigger("a"));
        d.triggers.push_back(trigger("a"));
        d.dispatch();
        assert!(d.triggers.is_empty());
        assert!(d.state("a").queued_pending);
        assert_eq!(d.state("a").running_count, 1);
    }

    #[tokio::test]
    async fn parallel_policy_stacks_instances_of_same_job() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Parallel)]);
        d.initialize(Utc::now());
        d.triggers.push_back(trigger("a"));
        d.triggers.push_back(trigger("a"));
        d.dispatch();
        assert!(d.triggers.is_empty());
        assert_eq!(d.state("a").running_count, 2);
        assert_eq!(d.active_job.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn interlock_serializes_distinct_job_names() {
        let mut d = dispatcher(vec![
            runtime_named("a", OverlapPolicy::Skip),
            runtime_named("b", OverlapPolicy::Skip),
        ]);
        d.initialize(Utc::now());
        d.triggers.push_back(trigger("a"));
        d.triggers.push_back(trigger("b"));
        d.dispatch();
        assert_eq!(d.state("a").running_count, 1);
        assert_eq!(d.state("b").running_count, 0, "b waits for the interlock");
        assert_eq!(d.triggers.len(), 1);
        assert_eq!(d.triggers[0].job_name, "b");
    }

    #[tokio::test]
    async fn completion_releases_interlock_and_requeues_pending() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Queue)]);
        d.initialize(Utc::now());
        d.triggers.push_back(trigger("a"));
        d.dispatch();
        assert_eq!(d.state("a").running_count, 1);

        // Overlapping trigger while running -> queued_pending.
        d.triggers.push_back(trigger("a"));
        d.dispatch();
        assert!(d.state("a").queued_pending);

        // Worker completes (the spawned run_job with zero scripts finishes
        // quickly; wait for its completion message).
        let (name, result) = d.completion_rx.recv().await.unwrap();
        assert_eq!(name, "a");
        assert!(result.success);
        // Feed it back through the public path.
        d.completion_tx.send((name, result)).unwrap();
        let now = Utc::now();
        d.drain_completions(now);

        assert_eq!(d.state("a").running_count, 0);
        assert!(!d.state("a").queued_pending);
        assert_eq!(d.triggers.len(), 1, "re-trigger queued");
        assert_eq!(d.triggers[0].scheduled_for, now);
        assert!(d.active_job.is_none(), "interlock released");
    }

    #[tokio::test]
    async fn requeued_trigger_sits_at_the_front() {
        let mut d = dispatcher(vec![
            runtime_named("a", OverlapPolicy::Queue),
            runtime_named("b", OverlapPolicy::Skip),
        ]);
        d.initialize(Utc::now());
        d.states.get_mut("a").unwrap().running_count = 1;
        d.states.get_mut("a").unwrap().queued_pending = true;
        d.triggers.push_back(trigger("b"));

        // Simulate a completed worker for "a".
        let result = JobRunResult {
            job_name: "a".into(),
            success: true,
            script_results: Vec::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            scheduled_for: None,
        };
        d.completion_tx.send(("a".into(), result)).unwrap();
        d.drain_completions(Utc::now());

        assert_eq!(d.triggers.len(), 2);
        assert_eq!(d.triggers[0].job_name, "a", "front-inserted re-trigger");
        assert_eq!(d.triggers[1].job_name, "b");
    }

    #[tokio::test]
    async fn running_count_never_goes_negative() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Skip)]);
        d.initialize(Utc::now());
        let result = JobRunResult {
            job_name: "a".into(),
            success: true,
            script_results: Vec::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            scheduled_for: None,
        };
        d.completion_tx.send(("a".into(), result)).unwrap();
        d.drain_completions(Utc::now());
        assert_eq!(d.state("a").running_count, 0);
    }

    #[tokio::test]
    async fn detect_triggers_advances_past_fired_instant() {
        let mut d = dispatcher(vec![runtime_named("a", OverlapPolicy::Skip)]);
        let now = Utc::now();
        d.initialize(now);
        // Force the job to be due.
        let due = now - chrono::Duration::seconds(30);
        d.states.get_mut("a").unwrap().next_fire = Some(due);
        d.detect_triggers(now);
        assert_eq!(d.triggers.len(), 1);
        assert_eq!(d.triggers[0].scheduled_for, due);
        let next = d.state("a").next_fire.unwrap();
        assert!(next > now, "no catch-up: next fire is strictly future");
    }
}
