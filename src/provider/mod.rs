//! # Remote Store Providers
//!
//! Abstract interface for the secret manager that receives reconciled secrets,
//! plus the implementations shipped with the crate:
//!
//! - [`http::HttpSecretStore`]: JSON-over-HTTP secret store client
//! - [`memory::MemoryStore`]: versioned in-memory store with fault injection
//!
//! All writes are conditional on a version token (optimistic concurrency). A store
//! must reject a write whose expected version does not match the current one with
//! [`StoreError::VersionConflict`].

pub mod common;
pub mod http;
pub mod memory;

use crate::secret::{Payload, RemoteSecretState, VersionToken};
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a [`RemoteStore`]
///
/// Messages carry status codes and truncated backend output, never payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("secret {name} not found")]
    NotFound { name: String },
    #[error("version conflict on {name}: expected {expected}")]
    VersionConflict { name: String, expected: String },
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("rejected by store: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Check if this error is transient (should retry)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Short stable identifier, used as a metric label
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::VersionConflict { .. } => "version_conflict",
            StoreError::Transient(_) => "transient",
            StoreError::Unauthorized(_) => "unauthorized",
            StoreError::Rejected(_) => "rejected",
        }
    }
}

/// Provider trait for remote secret stores
///
/// Implementations must be safe for concurrent use across distinct names.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short provider name used in logs and metrics (e.g. "http", "memory")
    fn provider_name(&self) -> &'static str;

    /// List every secret with its version and payload checksum
    async fn list(&self) -> Result<Vec<RemoteSecretState>, StoreError>;

    /// Fetch the current payload of a secret
    async fn get(&self, name: &str) -> Result<Payload, StoreError>;

    /// Write a payload
    ///
    /// `expected_version = None` means the secret must not exist yet (create).
    /// Returns the new version token.
    async fn put(
        &self,
        name: &str,
        payload: &Payload,
        expected_version: Option<&VersionToken>,
    ) -> Result<VersionToken, StoreError>;

    /// Delete a secret if it is still at `expected_version`
    async fn delete(&self, name: &str, expected_version: &VersionToken) -> Result<(), StoreError>;
}
