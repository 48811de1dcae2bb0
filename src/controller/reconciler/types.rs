//! # Types
//!
//! Outcomes, results and errors of a reconciliation run.

use crate::config::ConfigError;
use crate::controller::diff::{PlanAction, PlanEntry};
use crate::controller::parser::{ScanFailure, SourceError};
use crate::provider::StoreError;
use crate::secret::{Checksum, VersionToken};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Why an item was not applied, although nothing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The store already holds the desired payload
    NoChange,
    DryRun,
    /// The run was cancelled before the item started
    Cancelled,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoChange => "no_change",
            Self::DryRun => "dry_run",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The secret changed (or vanished) since the diff; nothing was written
    Stale,
    /// The lock stayed busy for the whole wait timeout, or its lease ran out mid-apply
    LockBusy,
    /// Transient store failures on every attempt
    RetriesExhausted,
    Unauthorized,
    /// The store refused the payload or name
    Rejected,
    /// The source file could not be loaded
    Scan,
    /// The source file could not be decrypted
    Decrypt,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::LockBusy => "lock_busy",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Unauthorized => "unauthorized",
            Self::Rejected => "rejected",
            Self::Scan => "scan",
            Self::Decrypt => "decrypt",
        }
    }

    /// Classify a store error that ended an item
    #[must_use]
    pub fn from_store_error(error: &StoreError) -> Self {
        match error {
            StoreError::VersionConflict { .. } | StoreError::NotFound { .. } => Self::Stale,
            StoreError::Transient(_) => Self::RetriesExhausted,
            StoreError::Unauthorized(_) => Self::Unauthorized,
            StoreError::Rejected(_) => Self::Rejected,
        }
    }
}

/// Per-item outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ItemOutcome {
    Applied,
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl ItemOutcome {
    /// `applied`, `skipped` or `failed`
    #[must_use]
    pub fn status(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    #[must_use]
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Applied => None,
            Self::Skipped(reason) => Some(reason.as_str()),
            Self::Failed(reason) => Some(reason.as_str()),
        }
    }

    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result for one logical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub name: String,
    /// Planned action; `None` for source files that failed to load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<PlanAction>,
    pub outcome: ItemOutcome,
    /// Store calls made, retries included
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_before: Option<Checksum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_after: Option<Checksum>,
    /// Version assigned by the store to a successful write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<VersionToken>,
    /// Source file, for scan failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    /// Error message; never contains payload values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemResult {
    /// Result for a plan entry, before any store call
    pub(crate) fn for_entry(entry: PlanEntry, outcome: ItemOutcome) -> Self {
        Self {
            name: entry.name,
            action: Some(entry.action),
            outcome,
            attempts: 0,
            checksum_before: entry.checksum_before,
            checksum_after: entry.checksum_after,
            new_version: None,
            source_path: None,
            detail: None,
        }
    }

    /// Result for a source file that failed to load
    pub(crate) fn for_scan_failure(failure: &ScanFailure) -> Self {
        let reason = if failure.error.as_decrypt_error().is_some() {
            FailureReason::Decrypt
        } else {
            FailureReason::Scan
        };
        Self {
            name: failure
                .name
                .clone()
                .unwrap_or_else(|| failure.path.display().to_string()),
            action: None,
            outcome: ItemOutcome::Failed(reason),
            attempts: 0,
            checksum_before: None,
            checksum_after: None,
            new_version: None,
            source_path: Some(failure.path.clone()),
            detail: Some(failure.error.to_string()),
        }
    }
}

/// Counts over a run's items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Planned items per action
    pub planned: BTreeMap<PlanAction, usize>,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    #[must_use]
    pub fn from_items(items: &[ItemResult]) -> Self {
        let mut summary = Self::default();
        for item in items {
            if let Some(action) = item.action {
                *summary.planned.entry(action).or_insert(0) += 1;
            }
            match item.outcome {
                ItemOutcome::Applied => summary.applied += 1,
                ItemOutcome::Skipped(_) => summary.skipped += 1,
                ItemOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Overall status: any failed item makes a run degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Clean,
    Degraded,
}

/// Report of one reconciliation run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub summary: Summary,
    pub items: Vec<ItemResult>,
}

impl ReconciliationResult {
    pub(crate) fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        dry_run: bool,
        items: Vec<ItemResult>,
    ) -> Self {
        let summary = Summary::from_items(&items);
        let status = if summary.failed > 0 {
            RunStatus::Degraded
        } else {
            RunStatus::Clean
        };
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            status,
            summary,
            items,
        }
    }

    /// Result for a logical name
    #[must_use]
    pub fn item(&self, name: &str) -> Option<&ItemResult> {
        self.items.iter().find(|item| item.name == name)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Clean
    }
}

/// Errors that abort a whole run before any item is applied
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("source unreadable: {0}")]
    SourceUnreadable(#[from] SourceError),
    #[error("cannot list observed state: {0}")]
    ObservedState(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, action: PlanAction, outcome: ItemOutcome) -> ItemResult {
        ItemResult::for_entry(
            PlanEntry {
                name: name.to_string(),
                action,
                expected_version: None,
                checksum_before: None,
                checksum_after: None,
            },
            outcome,
        )
    }

    #[test]
    fn test_summary_and_status() {
        let items = vec![
            item("a", PlanAction::Create, ItemOutcome::Applied),
            item("b", PlanAction::Update, ItemOutcome::Failed(FailureReason::Stale)),
            item("c", PlanAction::NoOp, ItemOutcome::Skipped(SkipReason::NoChange)),
        ];
        let result = ReconciliationResult::new(Uuid::nil(), Utc::now(), false, items);

        assert_eq!(result.status, RunStatus::Degraded);
        assert_eq!(result.summary.applied, 1);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.skipped, 1);
        assert_eq!(result.summary.planned.get(&PlanAction::Update), Some(&1));
        assert_eq!(
            result.item("b").map(|i| i.outcome),
            Some(ItemOutcome::Failed(FailureReason::Stale))
        );
    }

    #[test]
    fn test_store_error_classification() {
        let stale = StoreError::NotFound {
            name: "x".to_string(),
        };
        assert_eq!(FailureReason::from_store_error(&stale), FailureReason::Stale);
        assert_eq!(
            FailureReason::from_store_error(&StoreError::Transient("503".to_string())),
            FailureReason::RetriesExhausted
        );
        assert_eq!(
            FailureReason::from_store_error(&StoreError::Rejected("400".to_string())),
            FailureReason::Rejected
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ItemOutcome::Skipped(SkipReason::DryRun)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "skipped", "reason": "dry_run"}));
        let json = serde_json::to_value(ItemOutcome::Applied).unwrap();
        assert_eq!(json, serde_json::json!({"status": "applied"}));
    }
}
