//! # Metrics
//!
//! Prometheus metrics for monitoring the reconciler.
//!
//! ## Metrics Exposed
//!
//! - `secret_reconciler_reconciliations_total` - Total number of reconciliation runs
//! - `secret_reconciler_reconciliation_errors_total` - Runs that aborted or finished degraded
//! - `secret_reconciler_reconciliation_duration_seconds` - Duration of reconciliation runs
//! - `secret_reconciler_plan_items_total` - Planned items by action
//! - `secret_reconciler_item_outcomes_total` - Item outcomes by outcome and reason
//! - `secret_reconciler_secrets_managed` - Secrets declared by the last scan
//! - `secret_reconciler_store_operations_total` - Remote store operations by operation
//! - `secret_reconciler_store_operation_duration_seconds` - Duration of store operations
//! - `secret_reconciler_store_operation_errors_total` - Store errors by operation and kind
//! - `secret_reconciler_documents_scanned_total` - Source documents loaded by format
//! - `secret_reconciler_scan_failures_total` - Source files that failed to load by kind
//! - `secret_reconciler_stale_conflicts_total` - Writes refused because the secret changed since the diff
//! - `secret_reconciler_retries_total` - Retries of transient store failures
//! - `secret_reconciler_lock_contention_total` - Lock acquisitions that found the lock busy
//! - `secret_reconciler_sops_decryption_*` - SOPS decryption counters and duration
//! - `secret_reconciler_audit_events_dropped_total` - Audit events dropped by the bounded queue

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_reconciliations_total",
        "Total number of reconciliation runs",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_reconciliation_errors_total",
        "Total number of reconciliation runs that aborted or finished degraded",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secret_reconciler_reconciliation_duration_seconds",
            "Duration of reconciliation runs in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PLAN_ITEMS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_plan_items_total",
            "Total number of planned items by action",
        ),
        &["action"],
    )
    .expect("Failed to create PLAN_ITEMS_TOTAL metric - this should never happen")
});

static ITEM_OUTCOMES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_item_outcomes_total",
            "Total number of item outcomes by outcome and reason",
        ),
        &["outcome", "reason"],
    )
    .expect("Failed to create ITEM_OUTCOMES_TOTAL metric - this should never happen")
});

static SECRETS_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_reconciler_secrets_managed",
        "Number of secrets declared by the last scan",
    )
    .expect("Failed to create SECRETS_MANAGED metric - this should never happen")
});

static STORE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_store_operations_total",
            "Total number of remote store operations by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create STORE_OPERATIONS_TOTAL metric - this should never happen")
});

static STORE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secret_reconciler_store_operation_duration_seconds",
            "Duration of remote store operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["operation"],
    )
    .expect("Failed to create STORE_OPERATION_DURATION metric - this should never happen")
});

static STORE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_store_operation_errors_total",
            "Total number of remote store errors by operation and kind",
        ),
        &["operation", "kind"],
    )
    .expect("Failed to create STORE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_retries_total",
        "Total number of retries of transient store failures",
    )
    .expect("Failed to create RETRIES_TOTAL metric - this should never happen")
});

static LOCK_CONTENTION_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_lock_contention_total",
        "Total number of lock acquisitions that found the lock busy",
    )
    .expect("Failed to create LOCK_CONTENTION_TOTAL metric - this should never happen")
});

static SOPS_DECRYPTION_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_sops_decryption_total",
        "Total number of successful SOPS decryptions",
    )
    .expect("Failed to create SOPS_DECRYPTION_TOTAL metric - this should never happen")
});

static SOPS_DECRYPTION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secret_reconciler_sops_decryption_duration_seconds",
            "Duration of SOPS decryption operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create SOPS_DECRYPTION_DURATION metric - this should never happen")
});

static SOPS_DECRYPTION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_sops_decryption_errors_total",
            "Total number of SOPS decryption errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SOPS_DECRYPTION_ERRORS_TOTAL metric - this should never happen")
});

static DOCUMENTS_SCANNED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_documents_scanned_total",
            "Total number of source documents loaded by format",
        ),
        &["format"],
    )
    .expect("Failed to create DOCUMENTS_SCANNED_TOTAL metric - this should never happen")
});

static SCAN_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_reconciler_scan_failures_total",
            "Total number of source files that failed to load by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SCAN_FAILURES_TOTAL metric - this should never happen")
});

static STALE_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_stale_conflicts_total",
        "Total number of writes refused because the secret changed since the diff",
    )
    .expect("Failed to create STALE_CONFLICTS_TOTAL metric - this should never happen")
});

static AUDIT_EVENTS_DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_reconciler_audit_events_dropped_total",
        "Total number of audit events dropped because the queue was full",
    )
    .expect("Failed to create AUDIT_EVENTS_DROPPED_TOTAL metric - this should never happen")
});

/// Register all metrics with the shared registry
///
/// Call once at startup; registering twice fails with a duplicate collector error.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PLAN_ITEMS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEM_OUTCOMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_MANAGED.clone()))?;
    REGISTRY.register(Box::new(STORE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(STORE_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DOCUMENTS_SCANNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCAN_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STALE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOCK_CONTENTION_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOPS_DECRYPTION_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOPS_DECRYPTION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SOPS_DECRYPTION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUDIT_EVENTS_DROPPED_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_plan_items(action: &str) {
    PLAN_ITEMS_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_item_outcome(outcome: &str, reason: &str) {
    ITEM_OUTCOMES_TOTAL.with_label_values(&[outcome, reason]).inc();
}

pub fn set_secrets_managed(count: usize) {
    SECRETS_MANAGED.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn record_store_operation(operation: &str, duration: f64) {
    STORE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
    STORE_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_store_operation_errors(operation: &str, kind: &str) {
    STORE_OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation, kind])
        .inc();
}

pub fn increment_documents_scanned(format: &str) {
    DOCUMENTS_SCANNED_TOTAL.with_label_values(&[format]).inc();
}

pub fn increment_scan_failures(kind: &str) {
    SCAN_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_stale_conflicts() {
    STALE_CONFLICTS_TOTAL.inc();
}

pub fn increment_retries() {
    RETRIES_TOTAL.inc();
}

pub fn increment_lock_contention() {
    LOCK_CONTENTION_TOTAL.inc();
}

pub fn increment_sops_decryption_total() {
    SOPS_DECRYPTION_TOTAL.inc();
}

pub fn observe_sops_decryption_duration(duration: f64) {
    SOPS_DECRYPTION_DURATION.observe(duration);
}

pub fn increment_sops_decryption_errors_total(kind: &str) {
    SOPS_DECRYPTION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_audit_events_dropped(count: u64) {
    AUDIT_EVENTS_DROPPED_TOTAL.inc_by(count);
}
