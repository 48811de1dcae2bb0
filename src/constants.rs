//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default number of plan items applied in parallel
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Upper bound for `concurrency_limit`
/// Larger values mostly translate into throttling by the backend
pub const MAX_CONCURRENCY_LIMIT: usize = 64;

/// Default number of attempts for a transient store failure (first try included)
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 200;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

/// Default lock time-to-live (seconds)
/// Must exceed one item's worst-case apply: every attempt timing out plus the
/// backoff between attempts (105s with the defaults)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 120;

/// Default time to wait for a busy lock before failing the item (milliseconds)
pub const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Initial backoff while waiting for a busy lock (milliseconds)
pub const LOCK_WAIT_INITIAL_BACKOFF_MS: u64 = 10;

/// Maximum backoff while waiting for a busy lock (milliseconds)
pub const LOCK_WAIT_MAX_BACKOFF_MS: u64 = 1_000;

/// Default capacity of the in-memory audit queue
pub const DEFAULT_AUDIT_BUFFER_CAPACITY: usize = 1_024;

/// Maximum number of audit events written to a backend in one batch
pub const AUDIT_FLUSH_BATCH_SIZE: usize = 128;

/// Default interval between runs in watch mode (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// Minimum reconcile interval (seconds)
/// Shorter intervals mostly hammer the secret store's list API
pub const MIN_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Maximum secret payload size in bytes (64KB, matches common secret-manager limits)
pub const DEFAULT_MAX_SECRET_SIZE_BYTES: usize = 65_536;

/// Maximum logical name length
pub const MAX_LOGICAL_NAME_LEN: usize = 512;

/// Default timeout of a single store call (seconds)
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

/// Maximum length of external tool / backend error output kept in error messages
pub const MAX_ERROR_DETAIL_LEN: usize = 200;

/// Default actor recorded in audit events
pub const DEFAULT_ACTOR: &str = "secret-reconciler";

/// Minimum delay before retrying a watch-mode run that failed as a whole (seconds)
pub const WATCH_BACKOFF_MIN_SECS: u64 = 30;

/// Maximum delay before retrying a watch-mode run that failed as a whole (seconds)
pub const WATCH_BACKOFF_MAX_SECS: u64 = 300;

/// Time allowed for queued audit events to reach their backend on shutdown (seconds)
pub const AUDIT_SHUTDOWN_FLUSH_SECS: u64 = 5;
