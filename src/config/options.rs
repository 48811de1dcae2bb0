//! # Reconcile Options
//!
//! Options validated before a run starts. An invalid value fails the whole
//! run with [`ConfigError`] before anything is scanned or written.

use crate::constants::{
    DEFAULT_ACTOR, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CONCURRENCY_LIMIT,
    DEFAULT_LOCK_TTL_SECS, DEFAULT_LOCK_WAIT_TIMEOUT_MS, DEFAULT_RETRY_MAX_ATTEMPTS,
    DEFAULT_STORE_TIMEOUT_SECS, LOCK_WAIT_INITIAL_BACKOFF_MS, LOCK_WAIT_MAX_BACKOFF_MS, MAX_CONCURRENCY_LIMIT,
};
use crate::controller::backoff::ExponentialBackoff;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrency_limit must be between 1 and {max}, got {value}")]
    InvalidConcurrency { value: usize, max: usize },
    #[error("retry_max_attempts must be at least 1")]
    InvalidRetryAttempts,
    #[error("lock_ttl must be greater than zero")]
    InvalidLockTtl,
    #[error("store_timeout must be greater than zero")]
    InvalidStoreTimeout,
    #[error("lock_ttl of {ttl:?} cannot cover one apply, which may take up to {required:?}")]
    LockTtlTooShort { ttl: Duration, required: Duration },
    #[error("actor must not be empty")]
    EmptyActor,
}

/// Options of one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOptions {
    /// Delete remote secrets no source document declares
    pub prune_unmanaged: bool,
    /// Plan items applied in parallel within a phase
    pub concurrency_limit: usize,
    /// Compute and report the plan without writing anything
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            prune_unmanaged: false,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            dry_run: false,
        }
    }
}

impl ReconcileOptions {
    /// # Errors
    /// Returns [`ConfigError::InvalidConcurrency`] unless `1 <= concurrency_limit <= 64`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 || self.concurrency_limit > MAX_CONCURRENCY_LIMIT {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency_limit,
                max: MAX_CONCURRENCY_LIMIT,
            });
        }
        Ok(())
    }
}

/// Retry, lock and audit tuning of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Attempts per store call for transient failures, first try included
    pub retry_max_attempts: u32,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    /// Must exceed [`EngineSettings::max_apply_duration`]
    pub lock_ttl: Duration,
    /// Upper bound of a single store call; longer calls fail as transient
    pub store_timeout: Duration,
    /// How long an item waits for a busy lock before failing with `lock_busy`
    pub lock_wait_timeout: Duration,
    /// Recorded as the actor of every audit event
    pub actor: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_start: Duration::from_millis(DEFAULT_BACKOFF_START_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            lock_wait_timeout: Duration::from_millis(DEFAULT_LOCK_WAIT_TIMEOUT_MS),
            actor: DEFAULT_ACTOR.to_string(),
        }
    }
}

impl EngineSettings {
    /// # Errors
    /// Returns a [`ConfigError`] for zero retry attempts, a zero timeout, a lock TTL
    /// that cannot cover one apply or an empty actor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts);
        }
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::InvalidLockTtl);
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidStoreTimeout);
        }
        let required = self.max_apply_duration();
        if self.lock_ttl <= required {
            return Err(ConfigError::LockTtlTooShort {
                ttl: self.lock_ttl,
                required,
            });
        }
        if self.actor.trim().is_empty() {
            return Err(ConfigError::EmptyActor);
        }
        Ok(())
    }

    /// Longest one item's apply can take while holding its lock
    ///
    /// Every attempt runs into the store timeout, and every retry waits the
    /// largest backoff including jitter (half the base on top).
    #[must_use]
    pub fn max_apply_duration(&self) -> Duration {
        let retries = self.retry_max_attempts.saturating_sub(1);
        let largest_backoff = self.backoff_max.saturating_add(self.backoff_max / 2);
        self.store_timeout
            .saturating_mul(self.retry_max_attempts)
            .saturating_add(largest_backoff.saturating_mul(retries))
    }

    /// Backoff schedule between retries of a transient store failure
    #[must_use]
    pub fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_start, self.backoff_max)
    }

    /// Backoff schedule while waiting for a busy lock
    #[must_use]
    pub fn lock_wait_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(LOCK_WAIT_INITIAL_BACKOFF_MS),
            Duration::from_millis(LOCK_WAIT_MAX_BACKOFF_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ReconcileOptions::default();
        assert!(!options.prune_unmanaged);
        assert!(!options.dry_run);
        assert_eq!(options.concurrency_limit, 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        for value in [0, MAX_CONCURRENCY_LIMIT + 1] {
            let options = ReconcileOptions {
                concurrency_limit: value,
                ..ReconcileOptions::default()
            };
            assert_eq!(
                options.validate(),
                Err(ConfigError::InvalidConcurrency {
                    value,
                    max: MAX_CONCURRENCY_LIMIT
                })
            );
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(EngineSettings::default().validate().is_ok());

        let settings = EngineSettings {
            retry_max_attempts: 0,
            ..EngineSettings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::InvalidRetryAttempts));

        let settings = EngineSettings {
            lock_ttl: Duration::ZERO,
            ..EngineSettings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::InvalidLockTtl));
    }

    #[test]
    fn test_lock_ttl_must_cover_one_apply() {
        let defaults = EngineSettings::default();
        assert_eq!(defaults.max_apply_duration(), Duration::from_millis(105_000));
        assert!(defaults.lock_ttl > defaults.max_apply_duration());

        // 3 x 30s timeouts plus 2 x 7.5s backoff
        let settings = EngineSettings {
            lock_ttl: Duration::from_secs(30),
            ..EngineSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::LockTtlTooShort {
                ttl: Duration::from_secs(30),
                required: Duration::from_millis(105_000),
            })
        );

        let settings = EngineSettings {
            store_timeout: Duration::ZERO,
            ..EngineSettings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::InvalidStoreTimeout));
    }
}
