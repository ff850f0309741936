//! Best-effort, non-blocking telemetry emitter.
//!
//! Events are try-pushed into a bounded queue and shipped by a background
//! flusher in batches. Failed batches land in an append-only newline-JSON
//! spool file; the spool is replayed after each successful-path attempt so
//! outages drain once the endpoint recovers.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chief_domain::monitor::MonitorSettings;

use crate::event::MonitorEvent;

const FLUSH_BATCH_LIMIT: usize = 250;
const REPLAY_BATCH_LIMIT: usize = 250;
const SHUTDOWN_DRAIN_LIMIT: usize = 10_000;
const SHUTDOWN_REPLAY_LIMIT: usize = 1_000;
const MIN_FLUSH_INTERVAL_MS: u64 = 50;

/// Handle used by the scheduler side to enqueue telemetry. Cheap to share
/// by reference; all I/O happens on the background flusher task.
pub struct MonitorEmitter {
    settings: MonitorSettings,
    tx: Option<mpsc::Sender<MonitorEvent>>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    disabled_notice: AtomicBool,
}

impl MonitorEmitter {
    /// Build the emitter; when enabled, starts the background flusher.
    pub fn new(settings: MonitorSettings) -> Self {
        if !settings.enabled {
            return Self {
                settings,
                tx: None,
                stop_tx: None,
                handle: Mutex::new(None),
                dropped: AtomicU64::new(0),
                disabled_notice: AtomicBool::new(false),
            };
        }

        let (tx, rx) = mpsc::channel(settings.buffer.max_events.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let flusher = Flusher::new(settings.clone(), rx, stop_rx);
        let handle = tokio::spawn(flusher.run());

        Self {
            settings,
            tx: Some(tx),
            stop_tx: Some(stop_tx),
            handle: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
            disabled_notice: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Non-blocking enqueue. Overflow drops the event and counts it.
    pub fn emit(&self, event: MonitorEvent) {
        let Some(tx) = &self.tx else {
            if !self.disabled_notice.swap(true, Ordering::Relaxed) {
                tracing::info!("monitor emitter disabled; telemetry events will not be sent");
            }
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    dropped,
                    "monitor emitter queue is full; dropping telemetry event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the flusher and flush remaining events: one final batch of up
    /// to 10,000 queued events, then a spool replay of up to 1,000 lines.
    pub async fn close(&self) {
        if let Some(stop_tx) = &self.stop_tx {
            let _ = stop_tx.send(true);
        }
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flusher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Flusher {
    settings: MonitorSettings,
    rx: mpsc::Receiver<MonitorEvent>,
    stop_rx: watch::Receiver<bool>,
    http: Option<reqwest::Client>,
}

impl Flusher {
    fn new(
        settings: MonitorSettings,
        rx: mpsc::Receiver<MonitorEvent>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms.max(1)))
            .build()
            .map_err(|e| {
                tracing::warn!(error = %e, "monitor emitter failed to build HTTP client");
                e
            })
            .ok();
        Self {
            settings,
            rx,
            stop_rx,
            http,
        }
    }

    async fn run(mut self) {
        let tick = Duration::from_millis(
            self.settings
                .buffer
                .flush_interval_ms
                .max(MIN_FLUSH_INTERVAL_MS),
        );
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush_once().await;
                }
                changed = self.stop_rx.changed() => {
                    let stopped = changed.is_err() || *self.stop_rx.borrow();
                    if stopped {
                        break;
                    }
                }
            }
        }

        // Shutdown: one final oversized batch, then a deeper replay.
        let batch = self.collect_batch(SHUTDOWN_DRAIN_LIMIT);
        if !batch.is_empty() && !self.send_batch(&batch).await {
            self.spool(&batch);
        }
        self.replay_spool(SHUTDOWN_REPLAY_LIMIT).await;
    }

    async fn flush_once(&mut self) {
        let batch = self.collect_batch(FLUSH_BATCH_LIMIT);
        if !batch.is_empty() && !self.send_batch(&batch).await {
            self.spool(&batch);
        }
        self.replay_spool(REPLAY_BATCH_LIMIT).await;
    }

    fn collect_batch(&mut self, limit: usize) -> Vec<serde_json::Value> {
        let mut payloads = Vec::new();
        while payloads.len() < limit {
            match self.rx.try_recv() {
                Ok(event) => payloads.push(event.to_payload()),
                Err(_) => break,
            }
        }
        payloads
    }

    /// POST one batch; true on any 2xx response.
    async fn send_batch(&self, payloads: &[serde_json::Value]) -> bool {
        if payloads.is_empty() {
            return true;
        }
        let Some(http) = &self.http else {
            return false;
        };
        let url = format!(
            "{}/v1/events/batch",
            self.settings.endpoint.trim_end_matches('/')
        );
        let mut request = http
            .post(&url)
            .json(&serde_json::json!({ "events": payloads }));
        if !self.settings.api_key.is_empty() {
            request = request.header("x-api-key", &self.settings.api_key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "monitor emitter failed to send batch");
                false
            }
        }
    }

    fn spool(&self, payloads: &[serde_json::Value]) {
        if payloads.is_empty() {
            return;
        }
        if let Err(e) = append_spool(&self.settings.buffer.spool_file, payloads) {
            tracing::warn!(error = %e, "monitor emitter failed to spool events");
        }
    }

    /// Replay up to `limit` spooled lines; on success the spool is
    /// rewritten with only the unreplayed tail.
    async fn replay_spool(&self, limit: usize) {
        let path = &self.settings.buffer.spool_file;
        if !path.exists() {
            return;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "monitor emitter failed to read spool");
                return;
            }
        };
        if content.lines().next().is_none() {
            return;
        }
        let (payloads, remaining) = split_spool_lines(&content, limit);
        if payloads.is_empty() {
            // Nothing parseable in the head; shed it and keep the tail.
            if let Err(e) = rewrite_spool(path, &remaining) {
                tracing::warn!(error = %e, "monitor emitter failed to rewrite spool");
            }
            return;
        }
        if self.send_batch(&payloads).await {
            if let Err(e) = rewrite_spool(path, &remaining) {
                tracing::warn!(error = %e, "monitor emitter failed to rewrite spool");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spool file helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn append_spool(path: &Path, payloads: &[serde_json::Value]) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for payload in payloads {
        let line = serde_json::to_string(payload)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Split spool content into up to `limit` parsed head payloads and the raw
/// unreplayed tail lines. Unparseable head lines are discarded.
fn split_spool_lines(content: &str, limit: usize) -> (Vec<serde_json::Value>, Vec<String>) {
    let lines: Vec<&str> = content.lines().collect();
    let split_at = limit.min(lines.len());
    let payloads = lines[..split_at]
        .iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|value| value.is_object())
        .collect();
    let remaining = lines[split_at..].iter().map(|s| s.to_string()).collect();
    (payloads, remaining)
}

fn rewrite_spool(path: &Path, remaining: &[String]) -> std::io::Result<()> {
    let mut content = remaining.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use chief_domain::monitor::MonitorSettings;

    fn disabled_settings() -> MonitorSettings {
        MonitorSettings::disabled(Path::new("/tmp/chief-test"))
    }

    #[tokio::test]
    async fn disabled_emitter_is_a_no_op() {
        let emitter = MonitorEmitter::new(disabled_settings());
        assert!(!emitter.is_enabled());
        emitter.emit(MonitorEvent::new("job.started", Level::Info, "x"));
        emitter.emit(MonitorEvent::new("job.completed", Level::Info, "y"));
        assert_eq!(emitter.dropped_events(), 0);
        emitter.close().await;
    }

    #[test]
    fn split_respects_limit_and_keeps_tail() {
        let content = "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n";
        let (payloads, remaining) = split_spool_lines(content, 2);
        assert_eq!(payloads.len(), 2);
        assert_eq!(remaining, vec!["{\"c\":3}".to_string()]);
    }

    #[test]
    fn split_discards_unparseable_head_lines() {
        let content = "not-json\n{\"ok\":true}\n[1,2]\n";
        let (payloads, remaining) = split_spool_lines(content, 10);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["ok"], true);
        assert!(remaining.is_empty());
    }

    #[test]
    fn rewrite_preserves_trailing_newline_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        rewrite_spool(&path, &["{\"x\":1}".to_string()]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"x\":1}\n");
        rewrite_spool(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".chief/telemetry_spool.jsonl");
        let payloads = vec![serde_json::json!({"eventType": "job.started"})];
        append_spool(&path, &payloads).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        assert!(content.contains("job.started"));
    }

    #[tokio::test]
    async fn close_spools_undelivered_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = MonitorSettings::disabled(dir.path()).with_enabled(true);
        // Unroutable endpoint: every send fails fast, so close() must
        // spool the final batch.
        settings.endpoint = "http://127.0.0.1:9".to_string();
        settings.timeout_ms = 50;
        settings.buffer.flush_interval_ms = 60_000;
        let emitter = MonitorEmitter::new(settings.clone());
        emitter.emit(MonitorEvent::new("job.started", Level::Info, "one"));
        emitter.emit(MonitorEvent::new("job.completed", Level::Info, "two"));
        emitter.close().await;
        let content = std::fs::read_to_string(&settings.buffer.spool_file).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn queue_overflow_counts_drops() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = MonitorSettings::disabled(dir.path()).with_enabled(true);
        settings.endpoint = "http://127.0.0.1:9".to_string();
        settings.timeout_ms = 50;
        settings.buffer.max_events = 2;
        settings.buffer.flush_interval_ms = 60_000;
        let emitter = MonitorEmitter::new(settings);
        for i in 0..5 {
            emitter.emit(MonitorEvent::new("job.started", Level::Info, format!("{i}")));
        }
        assert!(emitter.dropped_events() >= 1);
        emitter.close().await;
    }
}
