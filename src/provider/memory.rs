//! # In-Memory Secret Store
//!
//! Versioned in-memory [`RemoteStore`] used by tests and by embedders that want to
//! reconcile into process memory.
//!
//! Besides the store semantics (conditional writes, monotonic version tokens) it
//! records every mutating call, can inject failures, add latency to writes and
//! tracks how many writes per name were in flight at the same time.
//!
//! This is ephemeral - data does not persist across restarts.
//! Thread-safe using Arc<RwLock> for concurrent access.

use crate::provider::common::StoreOperation;
use crate::provider::{RemoteStore, StoreError};
use crate::secret::{Payload, RemoteSecretState, VersionToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredSecret {
    payload: Payload,
    version: VersionToken,
    last_modified: DateTime<Utc>,
}

/// A mutating call as seen by the store, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: StoreOperation,
    pub name: String,
}

#[derive(Debug)]
struct Fault {
    name: Option<String>,
    operation: StoreOperation,
    error: StoreError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Instrumentation {
    calls: Vec<RecordedCall>,
    faults: Vec<Fault>,
    in_flight: HashMap<String, usize>,
}

/// In-memory secret store with versioning support
#[derive(Debug, Clone)]
pub struct MemoryStore {
    secrets: Arc<RwLock<HashMap<String, StoredSecret>>>,
    instrumentation: Arc<Mutex<Instrumentation>>,
    next_version: Arc<AtomicU64>,
    max_in_flight_per_name: Arc<AtomicUsize>,
    write_latency: Option<Duration>,
    report_checksums: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
            instrumentation: Arc::new(Mutex::new(Instrumentation::default())),
            next_version: Arc::new(AtomicU64::new(1)),
            max_in_flight_per_name: Arc::new(AtomicUsize::new(0)),
            write_latency: None,
            report_checksums: true,
        }
    }

    /// Sleep this long inside every put/delete (while the write counts as in flight)
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Behave like a backend that does not keep payload checksums
    #[must_use]
    pub fn without_checksums(mut self) -> Self {
        self.report_checksums = false;
        self
    }

    fn next_version(&self) -> VersionToken {
        VersionToken::new(format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst)))
    }

    fn instrumentation(&self) -> std::sync::MutexGuard<'_, Instrumentation> {
        self.instrumentation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a secret directly, bypassing version checks and the call log
    ///
    /// Simulates another actor changing the store. Returns the new version.
    pub async fn seed(&self, name: &str, payload: Payload) -> VersionToken {
        let version = self.next_version();
        self.secrets.write().await.insert(
            name.to_string(),
            StoredSecret {
                payload,
                version: version.clone(),
                last_modified: Utc::now(),
            },
        );
        version
    }

    /// Remove a secret directly, bypassing version checks and the call log
    pub async fn remove(&self, name: &str) -> bool {
        self.secrets.write().await.remove(name).is_some()
    }

    /// Current payload of a secret, if present
    pub async fn payload(&self, name: &str) -> Option<Payload> {
        self.secrets.read().await.get(name).map(|s| s.payload.clone())
    }

    /// Current version of a secret, if present
    pub async fn version(&self, name: &str) -> Option<VersionToken> {
        self.secrets.read().await.get(name).map(|s| s.version.clone())
    }

    /// Names currently stored, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.secrets.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail the next `times` calls of `operation` (optionally only for `name`) with `error`
    pub fn inject_failure(
        &self,
        name: Option<&str>,
        operation: StoreOperation,
        error: StoreError,
        times: usize,
    ) {
        self.instrumentation().faults.push(Fault {
            name: name.map(str::to_string),
            operation,
            error,
            remaining: times,
        });
    }

    /// Every put/delete call received, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.instrumentation().calls.clone()
    }

    /// Number of put/delete calls received
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.instrumentation().calls.len()
    }

    /// Highest number of concurrent writes observed for any single name
    #[must_use]
    pub fn max_in_flight_per_name(&self) -> usize {
        self.max_in_flight_per_name.load(Ordering::SeqCst)
    }

    fn take_fault(&self, name: &str, operation: StoreOperation) -> Result<(), StoreError> {
        let mut instrumentation = self.instrumentation();
        let fault = instrumentation.faults.iter_mut().find(|f| {
            f.remaining > 0
                && f.operation == operation
                && f.name.as_deref().is_none_or(|n| n == name)
        });
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                debug!("Injecting {} failure for {}", operation.as_str(), name);
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn begin_write(&self, operation: StoreOperation, name: &str) -> InFlightWrite<'_> {
        let mut instrumentation = self.instrumentation();
        instrumentation.calls.push(RecordedCall {
            operation,
            name: name.to_string(),
        });
        let count = instrumentation
            .in_flight
            .entry(name.to_string())
            .or_insert(0);
        *count += 1;
        self.max_in_flight_per_name.fetch_max(*count, Ordering::SeqCst);
        InFlightWrite {
            store: self,
            name: name.to_string(),
        }
    }
}

/// Decrements the in-flight counter for a name when the write finishes
struct InFlightWrite<'a> {
    store: &'a MemoryStore,
    name: String,
}

impl Drop for InFlightWrite<'_> {
    fn drop(&mut self) {
        let mut instrumentation = self.store.instrumentation();
        if let Some(count) = instrumentation.in_flight.get_mut(&self.name) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn provider_name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<RemoteSecretState>, StoreError> {
        self.take_fault("", StoreOperation::List)?;
        let secrets = self.secrets.read().await;
        let mut states: Vec<RemoteSecretState> = secrets
            .iter()
            .map(|(name, secret)| RemoteSecretState {
                name: name.clone(),
                version: secret.version.clone(),
                checksum: self.report_checksums.then(|| secret.payload.checksum()),
                last_modified: Some(secret.last_modified),
            })
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    async fn get(&self, name: &str) -> Result<Payload, StoreError> {
        self.take_fault(name, StoreOperation::Get)?;
        self.secrets
            .read()
            .await
            .get(name)
            .map(|s| s.payload.clone())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    async fn put(
        &self,
        name: &str,
        payload: &Payload,
        expected_version: Option<&VersionToken>,
    ) -> Result<VersionToken, StoreError> {
        let _write = self.begin_write(StoreOperation::Put, name);
        self.take_fault(name, StoreOperation::Put)?;
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        let mut secrets = self.secrets.write().await;
        match (secrets.get(name), expected_version) {
            (Some(current), None) => {
                return Err(StoreError::VersionConflict {
                    name: name.to_string(),
                    expected: format!("absent (found {})", current.version),
                });
            }
            (None, Some(_)) => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                });
            }
            (Some(current), Some(expected)) if &current.version != expected => {
                return Err(StoreError::VersionConflict {
                    name: name.to_string(),
                    expected: expected.to_string(),
                });
            }
            _ => {}
        }

        let version = self.next_version();
        secrets.insert(
            name.to_string(),
            StoredSecret {
                payload: payload.clone(),
                version: version.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(version)
    }

    async fn delete(&self, name: &str, expected_version: &VersionToken) -> Result<(), StoreError> {
        let _write = self.begin_write(StoreOperation::Delete, name);
        self.take_fault(name, StoreOperation::Delete)?;
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        let mut secrets = self.secrets.write().await;
        match secrets.get(name) {
            None => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            Some(current) if &current.version != expected_version => {
                Err(StoreError::VersionConflict {
                    name: name.to_string(),
                    expected: expected_version.to_string(),
                })
            }
            Some(_) => {
                secrets.remove(name);
                Ok(())
            }
        }
    }
}
