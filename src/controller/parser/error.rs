//! # Scan Errors
//!
//! Per-file failures ([`ScanError`]) and whole-scan failures ([`SourceError`]).

use crate::decrypt::DecryptError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single source file produced no document
///
/// A failing file never aborts the scan; it is reported next to the documents
/// that did load and its logical name is protected from pruning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("cannot read file: {0}")]
    Unreadable(String),
    #[error("malformed {format} document: {detail}")]
    Malformed { format: String, detail: String },
    #[error("logical name {name} is claimed by {} files: {}", paths.len(), display_paths(paths))]
    DuplicateName { name: String, paths: Vec<PathBuf> },
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
    #[error("file is still git-crypt encrypted; unlock the repository before reconciling")]
    Locked,
    #[error("invalid logical name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("payload is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("payload is empty")]
    EmptyPayload,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScanError {
    /// Short stable identifier, used in reports and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreadable(_) => "unreadable",
            Self::Malformed { .. } => "malformed",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::Decrypt(_) => "decrypt",
            Self::Locked => "locked",
            Self::InvalidName { .. } => "invalid_name",
            Self::TooLarge { .. } => "too_large",
            Self::EmptyPayload => "empty_payload",
        }
    }

    /// The decryption failure behind this error, if any
    #[must_use]
    pub fn as_decrypt_error(&self) -> Option<&DecryptError> {
        match self {
            Self::Decrypt(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn malformed(format: impl ToString, detail: impl ToString) -> Self {
        Self::Malformed {
            format: format.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// The source tree as a whole could not be scanned
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source root {path} is not a readable directory: {detail}")]
    RootUnreadable { path: PathBuf, detail: String },
    #[error("cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}
