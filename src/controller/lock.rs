//! # Locks
//!
//! Per-name mutual exclusion for mutating store calls.
//!
//! - Monotonically increasing fencing tokens identify each acquisition
//! - TTL-based expiry lets a new holder steal a lock whose holder died
//! - Release is compare-and-clear: it only removes the entry it acquired
//!
//! [`InProcessLockManager`] covers every reconciliation run sharing the same
//! instance. A distributed implementation plugs in behind [`LockManager`].

use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock on {name} is held by {holder}")]
    Busy { name: String, holder: String },
}

/// Proof of a held lock, passed back to [`LockManager::release`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    holder: String,
    token: u64,
    expires_at: Instant,
}

impl LockHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Fencing token of this acquisition
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Name-scoped mutual exclusion with expiry
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the lock on `name` for `ttl`, or fail immediately if someone else holds it
    async fn acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<LockHandle, LockError>;

    /// Release a lock if `handle` still owns it
    ///
    /// Returns `false` when the lock expired and was taken over (or already released).
    async fn release(&self, handle: &LockHandle) -> bool;
}

#[derive(Debug)]
struct LockEntry {
    holder: String,
    token: u64,
    expires_at: Instant,
}

/// Lock table held in process memory
#[derive(Debug)]
pub struct InProcessLockManager {
    table: Mutex<HashMap<String, LockEntry>>,
    next_token: AtomicU64,
}

impl Default for InProcessLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessLockManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of unexpired locks currently held
    #[must_use]
    pub fn held(&self) -> usize {
        let now = Instant::now();
        self.table().values().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl LockManager for InProcessLockManager {
    async fn acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        let now = Instant::now();
        let mut table = self.table();

        if let Some(entry) = table.get(name) {
            if entry.expires_at > now {
                return Err(LockError::Busy {
                    name: name.to_string(),
                    holder: entry.holder.clone(),
                });
            }
            warn!(
                lock = name,
                previous_holder = %entry.holder,
                previous_token = entry.token,
                "Taking over expired lock"
            );
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let expires_at = now + ttl;
        table.insert(
            name.to_string(),
            LockEntry {
                holder: holder.to_string(),
                token,
                expires_at,
            },
        );
        Ok(LockHandle {
            name: name.to_string(),
            holder: holder.to_string(),
            token,
            expires_at,
        })
    }

    async fn release(&self, handle: &LockHandle) -> bool {
        let mut table = self.table();
        match table.get(&handle.name) {
            Some(entry) if entry.token == handle.token => {
                table.remove(&handle.name);
                true
            }
            Some(entry) => {
                debug!(
                    lock = %handle.name,
                    token = handle.token,
                    current_token = entry.token,
                    "Lock was taken over, release is a no-op"
                );
                false
            }
            None => false,
        }
    }
}

/// Acquire a lock, waiting with jittered exponential backoff while it is busy
///
/// Gives up with [`LockError::Busy`] once `wait_timeout` has passed.
pub async fn acquire_with_wait(
    locks: &dyn LockManager,
    name: &str,
    holder: &str,
    ttl: Duration,
    wait_timeout: Duration,
    mut backoff: ExponentialBackoff,
) -> Result<LockHandle, LockError> {
    let deadline = Instant::now() + wait_timeout;
    let mut contended = false;

    loop {
        match locks.acquire(name, holder, ttl).await {
            Ok(handle) => return Ok(handle),
            Err(LockError::Busy { holder: current, .. }) => {
                if !contended {
                    metrics::increment_lock_contention();
                    contended = true;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Busy {
                        name: name.to_string(),
                        holder: current,
                    });
                }
                let delay = backoff.next_delay().min(deadline - now);
                debug!(
                    lock = name,
                    holder = %current,
                    backoff_ms = delay.as_millis(),
                    "Lock held, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
