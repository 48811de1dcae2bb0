//! # Apply
//!
//! Executes a [`Plan`] against the remote store.
//!
//! - Phases are barriers: creates finish before updates start, updates before deletes
//! - Within a phase up to `concurrency_limit` items run at once
//! - Every mutating call runs under the item's lock, released on every path
//! - Transient failures retry with jittered exponential backoff, but only while
//!   the item's lock stays valid for another attempt; version conflicts and
//!   missing secrets fail the item as stale without retrying
//! - After cancellation, items that have not started are skipped

use crate::controller::diff::{Plan, PlanAction, PlanItem};
use crate::controller::lock::acquire_with_wait;
use crate::controller::reconciler::types::{FailureReason, ItemOutcome, ItemResult, SkipReason};
use crate::controller::reconciler::Reconciler;
use crate::observability::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::observability::metrics;
use crate::provider::StoreError;
use crate::secret::VersionToken;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of the run an item belongs to
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunContext {
    pub run_id: Uuid,
    pub dry_run: bool,
}

impl Reconciler {
    /// Apply every item of `plan`, phase by phase
    pub(crate) async fn apply_plan(
        &self,
        run: RunContext,
        plan: Plan,
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<ItemResult> {
        let mut phases: [Vec<PlanItem>; 3] = Default::default();
        let mut no_ops = Vec::new();
        for item in plan {
            match item.action() {
                PlanAction::Create => phases[0].push(item),
                PlanAction::Update => phases[1].push(item),
                PlanAction::Delete => phases[2].push(item),
                PlanAction::NoOp => no_ops.push(item),
            }
        }

        let mut results = Vec::new();
        for phase in phases {
            if phase.is_empty() {
                continue;
            }
            let mut phase_results: Vec<ItemResult> = stream::iter(phase)
                .map(|item| self.apply_item(run, item, cancel))
                .buffer_unordered(concurrency_limit.max(1))
                .collect()
                .await;
            phase_results.sort_by(|a, b| a.name.cmp(&b.name));
            results.extend(phase_results);
        }

        for item in no_ops {
            let result =
                ItemResult::for_entry(item.describe(), ItemOutcome::Skipped(SkipReason::NoChange));
            self.record(run, &result);
            results.push(result);
        }
        results
    }

    async fn apply_item(
        &self,
        run: RunContext,
        item: PlanItem,
        cancel: &CancellationToken,
    ) -> ItemResult {
        let mut result = ItemResult::for_entry(item.describe(), ItemOutcome::Applied);

        if cancel.is_cancelled() {
            result.outcome = ItemOutcome::Skipped(SkipReason::Cancelled);
            result.checksum_after = None;
        } else if run.dry_run {
            result.outcome = ItemOutcome::Skipped(SkipReason::DryRun);
        } else {
            self.execute_locked(run, &item, &mut result).await;
        }

        self.record(run, &result);
        result
    }

    /// Take the item's lock, run the store call with retries, release the lock
    async fn execute_locked(&self, run: RunContext, item: &PlanItem, result: &mut ItemResult) {
        let name = item.name();
        let holder = run.run_id.to_string();

        let lock = match acquire_with_wait(
            self.locks.as_ref(),
            name,
            &holder,
            self.settings.lock_ttl,
            self.settings.lock_wait_timeout,
            self.settings.lock_wait_backoff(),
        )
        .await
        {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Giving up on {} {}: {}", item.action(), name, e);
                result.outcome = ItemOutcome::Failed(FailureReason::LockBusy);
                result.checksum_after = None;
                result.detail = Some(e.to_string());
                return;
            }
        };

        let retried = self
            .retry_transient(name, Some(lock.expires_at()), || self.execute(item))
            .await;

        if !self.locks.release(&lock).await {
            warn!(
                "Lock on {} expired while applying (token {}); consider a longer lock TTL",
                name,
                lock.token()
            );
        }

        result.attempts = retried.attempts;
        match retried.result {
            Ok(version) => {
                debug!(
                    "Applied {} {} in {} attempt(s)",
                    item.action(),
                    name,
                    retried.attempts
                );
                result.new_version = version;
            }
            Err(e) => {
                let reason = if retried.out_of_time {
                    FailureReason::LockBusy
                } else {
                    FailureReason::from_store_error(&e)
                };
                if reason == FailureReason::Stale {
                    metrics::increment_stale_conflicts();
                    info!(
                        "{} {} is stale, the secret changed since the diff: {}",
                        item.action(),
                        name,
                        e
                    );
                } else {
                    warn!("Failed to {} {}: {}", item.action(), name, e);
                }
                result.outcome = ItemOutcome::Failed(reason);
                result.checksum_after = None;
                result.detail = Some(e.to_string());
            }
        }
    }

    async fn execute(&self, item: &PlanItem) -> Result<Option<VersionToken>, StoreError> {
        match item {
            PlanItem::Create { name, payload, .. } => {
                self.store.put(name, payload, None).await.map(Some)
            }
            PlanItem::Update {
                name,
                payload,
                expected_version,
                ..
            } => self
                .store
                .put(name, payload, Some(expected_version))
                .await
                .map(Some),
            PlanItem::Delete {
                name,
                expected_version,
                ..
            } => self.store.delete(name, expected_version).await.map(|()| None),
            PlanItem::NoOp { .. } => Ok(None),
        }
    }

    /// Emit the audit event and metrics for a finished item
    pub(crate) fn record(&self, run: RunContext, result: &ItemResult) {
        metrics::increment_item_outcome(
            result.outcome.status(),
            result.outcome.reason().unwrap_or(""),
        );

        let action = match result.action {
            Some(PlanAction::Create) => AuditAction::Create,
            Some(PlanAction::Update) => AuditAction::Update,
            Some(PlanAction::Delete) => AuditAction::Delete,
            Some(PlanAction::NoOp) => AuditAction::NoOp,
            None => AuditAction::Scan,
        };
        let outcome = match result.outcome {
            ItemOutcome::Applied => AuditOutcome::Applied,
            ItemOutcome::Skipped(_) => AuditOutcome::Skipped,
            ItemOutcome::Failed(_) => AuditOutcome::Failed,
        };

        self.audit.emit(AuditEvent {
            timestamp: Utc::now(),
            run_id: run.run_id,
            name: result.name.clone(),
            action,
            outcome,
            reason: result.outcome.reason().map(str::to_string),
            actor: self.settings.actor.clone(),
            checksum_before: result.checksum_before.clone(),
            checksum_after: result.checksum_after.clone(),
        });
    }
}
