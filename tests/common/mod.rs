//! Common test utilities for reconciliation tests
//!
//! Provides a recording audit sink, source tree helpers and an engine wired to
//! an in-memory store with fast retry and lock settings.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use secret_reconciler::config::EngineSettings;
use secret_reconciler::controller::lock::{InProcessLockManager, LockManager};
use secret_reconciler::controller::reconciler::Reconciler;
use secret_reconciler::decrypt::DisabledDecryptor;
use secret_reconciler::observability::audit::{AuditEvent, AuditSink};
use secret_reconciler::provider::memory::MemoryStore;
use secret_reconciler::secret::Payload;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Audit sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Retry and lock settings that keep tests fast
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_max_attempts: 3,
        backoff_start: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        lock_ttl: Duration::from_secs(5),
        store_timeout: Duration::from_secs(1),
        lock_wait_timeout: Duration::from_secs(2),
        actor: "test-suite".to_string(),
    }
}

/// Engine plus handles on its store and audit trail
pub struct Harness {
    pub store: MemoryStore,
    pub audit: Arc<RecordingAuditSink>,
    pub locks: Arc<InProcessLockManager>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let audit = Arc::new(RecordingAuditSink::default());
        let locks = Arc::new(InProcessLockManager::new());
        let reconciler = Reconciler::new(Arc::new(store.clone()))
            .with_decryptor(Arc::new(DisabledDecryptor))
            .with_locks(Arc::clone(&locks) as Arc<dyn LockManager>)
            .with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>)
            .with_settings(fast_settings());
        Self {
            store,
            audit,
            locks,
            reconciler,
        }
    }
}

/// Write `content` to `relative` under `root`, creating parent directories
pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn payload(entries: &[(&str, &str)]) -> Payload {
    let mut payload = Payload::new();
    for (key, value) in entries {
        payload.insert(*key, *value);
    }
    payload
}

/// SOPS-looking document that no test decryptor can open
pub fn encrypted_yaml() -> &'static str {
    "API_KEY: ENC[AES256_GCM,data:abc,iv:def,tag:ghi,type:str]\n\
sops:\n  age:\n    - recipient: age1example\n  mac: ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]\n  version: 3.8.0\n"
}
