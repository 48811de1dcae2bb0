//! # Audit Events
//!
//! Append-only audit trail of what the reconciler did to each logical secret.
//!
//! Emission is fire-and-forget: [`AuditSink::emit`] never fails and never waits
//! on I/O. [`BufferedAuditSink`] keeps a bounded queue (drop-oldest) that a
//! background task drains into an [`AuditBackend`]; when the backend is down the
//! queue absorbs events until it is full, then starts dropping the oldest ones.
//!
//! Events carry checksums and metadata only, never payloads.

use crate::constants::AUDIT_FLUSH_BATCH_SIZE;
use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use crate::secret::Checksum;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Log target of events written by [`LogAuditBackend`]
pub const AUDIT_LOG_TARGET: &str = "secret_reconciler::audit";

/// What was done (or attempted) to a logical secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    NoOp,
    /// The source document could not be scanned or decrypted
    Scan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Skipped,
    Failed,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub name: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_before: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_after: Option<Checksum>,
}

/// Fire-and-forget event emitter used by the engine
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Durable destination for audit events, written in batches
#[async_trait]
pub trait AuditBackend: Send + Sync {
    async fn write_batch(&self, events: &[AuditEvent]) -> anyhow::Result<()>;
}

/// Writes audit events as structured log lines on [`AUDIT_LOG_TARGET`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditBackend;

impl LogAuditBackend {
    fn log(event: &AuditEvent) {
        info!(
            target: AUDIT_LOG_TARGET,
            run_id = %event.run_id,
            secret = %event.name,
            action = ?event.action,
            outcome = ?event.outcome,
            reason = event.reason.as_deref().unwrap_or(""),
            actor = %event.actor,
            checksum_before = event.checksum_before.as_ref().map_or("", Checksum::as_str),
            checksum_after = event.checksum_after.as_ref().map_or("", Checksum::as_str),
            "audit event"
        );
    }
}

#[async_trait]
impl AuditBackend for LogAuditBackend {
    async fn write_batch(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        events.iter().for_each(Self::log);
        Ok(())
    }
}

impl AuditSink for LogAuditBackend {
    fn emit(&self, event: AuditEvent) {
        Self::log(&event);
    }
}

/// Appends audit events to a JSON-lines file
#[derive(Debug, Clone)]
pub struct JsonLinesAuditBackend {
    path: PathBuf,
}

impl JsonLinesAuditBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditBackend for JsonLinesAuditBackend {
    async fn write_batch(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        let mut buffer = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Bounded, drop-oldest audit queue drained by a background task
#[derive(Debug)]
pub struct BufferedAuditSink {
    queue: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    in_flight: AtomicUsize,
    dropped: AtomicU64,
    notify: Notify,
}

impl BufferedAuditSink {
    /// Create a queue without a flusher; events accumulate until [`Self::spawn`]-style draining
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity: capacity.max(1),
            in_flight: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        })
    }

    /// Create a queue and spawn the task that drains it into `backend`
    ///
    /// The task stops when `shutdown` is cancelled, after one last drain attempt.
    pub fn spawn(
        backend: Arc<dyn AuditBackend>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let sink = Self::new(capacity);
        let handle = tokio::spawn(Self::run_flusher(Arc::clone(&sink), backend, shutdown));
        (sink, handle)
    }

    /// Number of events dropped because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of events waiting in the queue
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Snapshot of queued events, oldest first
    #[must_use]
    pub fn queued(&self) -> Vec<AuditEvent> {
        self.lock_queue().iter().cloned().collect()
    }

    /// Wait until every queued event has been written, or `timeout` passes
    ///
    /// Returns `true` if the queue drained in time.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending() == 0 && self.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            self.notify.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
            metrics::increment_audit_events_dropped(count);
        }
    }

    fn take_batch(&self, max: usize) -> Vec<AuditEvent> {
        let mut queue = self.lock_queue();
        let count = queue.len().min(max);
        let batch: Vec<AuditEvent> = queue.drain(..count).collect();
        self.in_flight.store(batch.len(), Ordering::Release);
        batch
    }

    /// Put a failed batch back at the head of the queue, keeping the capacity bound
    fn requeue_front(&self, batch: Vec<AuditEvent>) {
        let mut queue = self.lock_queue();
        for event in batch.into_iter().rev() {
            queue.push_front(event);
        }
        let mut dropped = 0;
        while queue.len() > self.capacity {
            queue.pop_front();
            dropped += 1;
        }
        self.in_flight.store(0, Ordering::Release);
        drop(queue);
        self.record_dropped(dropped);
    }

    async fn run_flusher(
        sink: Arc<Self>,
        backend: Arc<dyn AuditBackend>,
        shutdown: CancellationToken,
    ) {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        loop {
            let batch = sink.take_batch(AUDIT_FLUSH_BATCH_SIZE);
            if batch.is_empty() {
                tokio::select! {
                    () = sink.notify.notified() => continue,
                    () = shutdown.cancelled() => break,
                }
            }

            match backend.write_batch(&batch).await {
                Ok(()) => {
                    sink.in_flight.store(0, Ordering::Release);
                    backoff.reset();
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Audit backend unavailable ({} events buffered), retrying in {:?}: {}",
                        batch.len() + sink.pending(),
                        delay,
                        e
                    );
                    sink.requeue_front(batch);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = shutdown.cancelled() => break,
                    }
                }
            }
        }

        // Last attempt to drain on shutdown
        let remaining = sink.take_batch(usize::MAX);
        if !remaining.is_empty() {
            if let Err(e) = backend.write_batch(&remaining).await {
                warn!("Dropping {} audit events on shutdown: {}", remaining.len(), e);
                sink.record_dropped(remaining.len() as u64);
            }
        }
        sink.in_flight.store(0, Ordering::Release);
        debug!("Audit flusher stopped");
    }
}

impl AuditSink for BufferedAuditSink {
    fn emit(&self, event: AuditEvent) {
        let mut queue = self.lock_queue();
        let mut dropped = 0;
        while queue.len() >= self.capacity {
            queue.pop_front();
            dropped += 1;
        }
        queue.push_back(event);
        drop(queue);

        self.record_dropped(dropped);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn event(name: &str) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            run_id: Uuid::nil(),
            name: name.to_string(),
            action: AuditAction::Create,
            outcome: AuditOutcome::Applied,
            reason: None,
            actor: "test".to_string(),
            checksum_before: None,
            checksum_after: None,
        }
    }

    #[derive(Default)]
    struct FlakyBackend {
        healthy: AtomicBool,
        written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditBackend for FlakyBackend {
        async fn write_batch(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
            if !self.healthy.load(Ordering::SeqCst) {
                anyhow::bail!("backend down");
            }
            self.written
                .lock()
                .unwrap()
                .extend(events.iter().map(|e| e.name.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_emit_drops_oldest_when_full() {
        let sink = BufferedAuditSink::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            sink.emit(event(name));
        }

        let names: Vec<String> = sink.queued().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["c", "d", "e"]);
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_requeue_keeps_capacity_bound() {
        let sink = BufferedAuditSink::new(3);
        sink.emit(event("a"));
        sink.emit(event("b"));
        let batch = sink.take_batch(2);
        sink.emit(event("c"));
        sink.emit(event("d"));
        sink.requeue_front(batch);

        let names: Vec<String> = sink.queued().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_flusher_delivers_after_backend_recovers() {
        let backend = Arc::new(FlakyBackend::default());
        let shutdown = CancellationToken::new();
        let (sink, handle) = BufferedAuditSink::spawn(
            Arc::clone(&backend) as Arc<dyn AuditBackend>,
            16,
            shutdown.clone(),
        );

        sink.emit(event("first"));
        sink.emit(event("second"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.written.lock().unwrap().is_empty());

        backend.healthy.store(true, Ordering::SeqCst);
        assert!(sink.flush(Duration::from_secs(5)).await);
        assert_eq!(
            *backend.written.lock().unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_json_lines_backend_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let backend = JsonLinesAuditBackend::new(&path);

        backend.write_batch(&[event("a")]).await.unwrap();
        backend.write_batch(&[event("b")]).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<AuditEvent>(line).unwrap().name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
