//! # Reconciler
//!
//! Core reconciliation logic: brings a remote secret store in line with the
//! secret documents declared in a source tree.
//!
//! ## Reconciliation Flow
//!
//! 1. Validate options
//! 2. Scan the source tree (decrypting SOPS documents in memory)
//! 3. List the observed state of the store (fetching payloads for backends
//!    that report no checksum)
//! 4. Diff desired against observed state into an ordered plan
//! 5. Apply the plan: bounded parallelism per phase, per-name locks,
//!    version-checked writes, retries for transient failures
//! 6. Emit an audit event per item and return a [`ReconciliationResult`]
//!
//! A failed file or item never aborts the run; it shows up as a failed item
//! and makes the run [`RunStatus::Degraded`].

mod apply;
pub mod types;

pub use types::{
    FailureReason, ItemOutcome, ItemResult, ReconcileError, ReconciliationResult, RunStatus,
    SkipReason, Summary,
};

use crate::config::{EngineSettings, ReconcileOptions};
use crate::controller::diff::{diff, DiffOptions, Plan, PlanEntry};
use crate::controller::lock::{InProcessLockManager, LockManager};
use crate::controller::parser::{ScanFailure, SecretSource, SourceOptions};
use crate::decrypt::{Decryptor, SopsDecryptor};
use crate::observability::audit::{AuditSink, LogAuditBackend};
use crate::observability::metrics;
use crate::provider::{RemoteStore, StoreError};
use crate::secret::{RemoteSecretState, SecretDocument};
use apply::RunContext;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Scan and diff outcome of a run, before anything is applied
#[derive(Debug)]
pub struct PlannedRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub plan: Plan,
    /// Source files that produced no document
    pub scan_failures: Vec<ScanFailure>,
    /// Names protected from pruning because their source failed
    pub unresolved: BTreeSet<String>,
}

impl PlannedRun {
    /// Payload-free description of the plan
    #[must_use]
    pub fn describe(&self) -> Vec<PlanEntry> {
        self.plan.describe()
    }
}

/// Reconciliation engine
///
/// Cheap to share: every collaborator sits behind an `Arc`. Runs sharing one
/// engine (or one [`LockManager`]) never write the same name concurrently.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    source: SecretSource,
    locks: Arc<dyn LockManager>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store.provider_name())
            .field("source", &self.source)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Engine with the sops decryptor, an in-process lock table and log-only audit
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            source: SecretSource::new(Arc::new(SopsDecryptor::new()), SourceOptions::default()),
            locks: Arc::new(InProcessLockManager::new()),
            audit: Arc::new(LogAuditBackend),
            settings: EngineSettings::default(),
        }
    }

    #[must_use]
    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.source = SecretSource::new(decryptor, self.source.options().clone());
        self
    }

    #[must_use]
    pub fn with_source_options(mut self, options: SourceOptions) -> Self {
        self.source = SecretSource::new(self.source.decryptor(), options);
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Scan, diff and apply in one go
    ///
    /// # Errors
    /// Returns [`ReconcileError`] when the run cannot start: invalid options, an
    /// unreadable source tree or an unavailable store listing. Per-item failures
    /// are reported in the result instead.
    pub async fn reconcile(
        &self,
        root: &Path,
        options: &ReconcileOptions,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = match self.plan(root, options).await {
            Ok(planned) => Ok(self.apply(planned, options, cancel).await),
            Err(e) => Err(e),
        };

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        match &result {
            Ok(result) if result.is_clean() => {}
            Ok(_) | Err(_) => metrics::increment_reconciliation_errors(),
        }
        result
    }

    /// Scan the source and diff it against the store, without writing anything
    ///
    /// # Errors
    /// See [`Reconciler::reconcile`].
    pub async fn plan(
        &self,
        root: &Path,
        options: &ReconcileOptions,
    ) -> Result<PlannedRun, ReconcileError> {
        options.validate()?;
        self.settings.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("reconcile.plan", run.id = %run_id, source.root = %root.display());

        async move {
            let scan = self.source.scan(root).await?;
            let unresolved = scan.unresolved_names();
            metrics::set_secrets_managed(scan.documents.len());

            let mut observed = self
                .retry_transient("list", None, || self.store.list())
                .await
                .result
                .map_err(ReconcileError::ObservedState)?;
            self.fill_missing_checksums(&mut observed, &scan.documents)
                .await;

            let plan = diff(
                scan.documents,
                &observed,
                &DiffOptions {
                    prune_unmanaged: options.prune_unmanaged,
                    protected: unresolved.clone(),
                },
            );
            for item in plan.items() {
                metrics::increment_plan_items(item.action().as_str());
            }
            info!(
                "Planned {} items against {} ({} observed secrets, {} unresolved names)",
                plan.len(),
                self.store.provider_name(),
                observed.len(),
                unresolved.len()
            );

            Ok::<_, ReconcileError>(PlannedRun {
                run_id,
                started_at,
                plan,
                scan_failures: scan.failures,
                unresolved,
            })
        }
        .instrument(span)
        .await
    }

    /// Apply a planned run
    ///
    /// Scan failures of the run are reported as failed items next to the plan's items.
    pub async fn apply(
        &self,
        planned: PlannedRun,
        options: &ReconcileOptions,
        cancel: &CancellationToken,
    ) -> ReconciliationResult {
        let run = RunContext {
            run_id: planned.run_id,
            dry_run: options.dry_run,
        };
        let span = info_span!("reconcile.apply", run.id = %run.run_id, dry_run = run.dry_run);

        async move {
            let mut items = self
                .apply_plan(run, planned.plan, options.concurrency_limit, cancel)
                .await;

            for failure in &planned.scan_failures {
                let result = ItemResult::for_scan_failure(failure);
                self.record(run, &result);
                items.push(result);
            }

            let result =
                ReconciliationResult::new(run.run_id, planned.started_at, run.dry_run, items);
            info!(
                status = ?result.status,
                applied = result.summary.applied,
                skipped = result.summary.skipped,
                failed = result.summary.failed,
                "Reconciliation finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    /// Hash the payload of observed secrets whose backend reported no checksum
    ///
    /// Only names that are also desired need it. When the fetch fails the
    /// checksum stays unknown and the diff plans a (version-checked) update.
    async fn fill_missing_checksums(
        &self,
        observed: &mut [RemoteSecretState],
        desired: &[SecretDocument],
    ) {
        let desired: BTreeSet<&str> = desired.iter().map(|d| d.name.as_str()).collect();
        for state in observed
            .iter_mut()
            .filter(|s| s.checksum.is_none() && desired.contains(s.name.as_str()))
        {
            let name = state.name.clone();
            match self
                .retry_transient(&name, None, || self.store.get(&name))
                .await
                .result
            {
                Ok(payload) => {
                    debug!("Computed checksum of {} from its payload", name);
                    state.checksum = Some(payload.checksum());
                }
                Err(e) => warn!("Cannot fetch {} to compare checksums: {}", name, e),
            }
        }
    }

    /// Run a store call, retrying transient failures with jittered backoff
    ///
    /// Each attempt is bounded by the store timeout. With a `deadline`, no attempt
    /// starts unless it can finish (timeout included) before the deadline.
    async fn retry_transient<T, F, Fut>(
        &self,
        target: &str,
        deadline: Option<Instant>,
        mut call: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = self.settings.retry_backoff();
        let max_attempts = self.settings.retry_max_attempts.max(1);
        let timeout = self.settings.store_timeout;
        let mut attempts = 1;
        loop {
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Transient(format!(
                    "store call timed out after {timeout:?}"
                ))),
            };
            match result {
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    let delay = backoff.next_delay();
                    if deadline.is_some_and(|d| Instant::now() + delay + timeout > d) {
                        warn!(
                            "Not retrying {} after attempt {}/{}, its lock would expire first: {}",
                            target, attempts, max_attempts, e
                        );
                        return RetryOutcome {
                            result: Err(e),
                            attempts,
                            out_of_time: true,
                        };
                    }
                    debug!(
                        "Transient failure on {} (attempt {}/{}), retrying in {:?}: {}",
                        target, attempts, max_attempts, delay, e
                    );
                    metrics::increment_retries();
                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
                result => {
                    return RetryOutcome {
                        result,
                        attempts,
                        out_of_time: false,
                    };
                }
            }
        }
    }
}

/// Outcome of a store call and its retries
pub(crate) struct RetryOutcome<T> {
    /// Result of the last attempt
    pub result: Result<T, StoreError>,
    pub attempts: u32,
    /// Retries stopped early because the deadline left no room for another attempt
    pub out_of_time: bool,
}

