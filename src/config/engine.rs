//! # Engine Configuration
//!
//! Process-level settings loaded from environment variables.

use crate::config::options::EngineSettings;
use crate::constants::*;
use crate::controller::parser::SourceOptions;
use std::time::Duration;

/// Process-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables
/// (a `.env` file in the working directory is loaded first by the binary).
/// Command line flags take precedence over both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE), used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Port of the metrics and probe server in watch mode
    pub metrics_port: u16,
    /// Interval between runs in watch mode (seconds)
    /// Clamped to `MIN_RECONCILE_INTERVAL_SECS`
    pub reconcile_interval_secs: u64,
    /// Plan items applied in parallel within a phase
    pub concurrency_limit: usize,
    /// Attempts per store call for transient failures, first try included
    pub retry_max_attempts: u32,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Lock time-to-live (seconds)
    pub lock_ttl_secs: u64,
    /// Timeout of a single store call (seconds)
    pub store_timeout_secs: u64,
    /// Time to wait for a busy lock (milliseconds)
    pub lock_wait_timeout_ms: u64,
    /// Capacity of the in-memory audit queue
    pub audit_buffer_capacity: usize,
    /// Maximum secret payload size in bytes
    pub max_secret_size_bytes: usize,
    /// Accept source documents without entries
    pub allow_empty_payload: bool,
    /// Leading segment prepended to every logical name
    pub name_prefix: Option<String>,
    /// Actor recorded in audit events
    pub actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            lock_wait_timeout_ms: DEFAULT_LOCK_WAIT_TIMEOUT_MS,
            audit_buffer_capacity: DEFAULT_AUDIT_BUFFER_CAPACITY,
            max_secret_size_bytes: DEFAULT_MAX_SECRET_SIZE_BYTES,
            allow_empty_payload: true,
            name_prefix: None,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: var_or_default_str(&lookup, "LOG_LEVEL", &defaults.log_level),
            log_format: var_or_default_str(&lookup, "LOG_FORMAT", &defaults.log_format),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", defaults.metrics_port),
            reconcile_interval_secs: var_or_default(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            )
            .max(MIN_RECONCILE_INTERVAL_SECS),
            concurrency_limit: var_or_default(
                &lookup,
                "CONCURRENCY_LIMIT",
                defaults.concurrency_limit,
            ),
            retry_max_attempts: var_or_default(
                &lookup,
                "RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            ),
            backoff_start_ms: var_or_default(&lookup, "BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: var_or_default(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            lock_ttl_secs: var_or_default(&lookup, "LOCK_TTL_SECS", defaults.lock_ttl_secs),
            store_timeout_secs: var_or_default(
                &lookup,
                "STORE_TIMEOUT_SECS",
                defaults.store_timeout_secs,
            ),
            lock_wait_timeout_ms: var_or_default(
                &lookup,
                "LOCK_WAIT_TIMEOUT_MS",
                defaults.lock_wait_timeout_ms,
            ),
            audit_buffer_capacity: var_or_default(
                &lookup,
                "AUDIT_BUFFER_CAPACITY",
                defaults.audit_buffer_capacity,
            ),
            max_secret_size_bytes: var_or_default(
                &lookup,
                "MAX_SECRET_SIZE_BYTES",
                defaults.max_secret_size_bytes,
            ),
            allow_empty_payload: var_or_default_bool(
                &lookup,
                "ALLOW_EMPTY_PAYLOAD",
                defaults.allow_empty_payload,
            ),
            name_prefix: lookup("SECRET_NAME_PREFIX").filter(|p| !p.trim().is_empty()),
            actor: var_or_default_str(&lookup, "AUDIT_ACTOR", &defaults.actor),
        }
    }

    /// Engine retry and lock settings
    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            retry_max_attempts: self.retry_max_attempts,
            backoff_start: Duration::from_millis(self.backoff_start_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            lock_wait_timeout: Duration::from_millis(self.lock_wait_timeout_ms),
            actor: self.actor.clone(),
        }
    }

    /// Scanner settings
    #[must_use]
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            name_prefix: self.name_prefix.clone(),
            max_secret_size_bytes: self.max_secret_size_bytes,
            allow_empty_payload: self.allow_empty_payload,
        }
    }

    /// Get reconcile interval duration
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(MIN_RECONCILE_INTERVAL_SECS))
    }
}

/// Read a variable or return the default value when unset or unparsable
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a variable as boolean or return default
fn var_or_default_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a variable as string or return default
fn var_or_default_str(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}
