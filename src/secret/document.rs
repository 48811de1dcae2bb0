//! # Documents and Remote State
//!
//! Desired state (`SecretDocument`, from the source tree) and observed state
//! (`RemoteSecretState`, from the store).

use crate::secret::{Checksum, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Source document formats understood by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Yaml,
    Json,
    Dotenv,
    Properties,
}

impl SourceFormat {
    /// Map a file extension (without the dot) to a format
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "env" => Some(Self::Dotenv),
            "properties" => Some(Self::Properties),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Dotenv => "dotenv",
            Self::Properties => "properties",
        }
    }

    /// Value for sops' `--input-type`/`--output-type`, if sops can handle this format
    #[must_use]
    pub fn sops_type(self) -> Option<&'static str> {
        match self {
            Self::Yaml => Some("yaml"),
            Self::Json => Some("json"),
            Self::Dotenv => Some("dotenv"),
            Self::Properties => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, backend-assigned version of a remote secret
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionToken({})", self.0)
    }
}

/// One declared secret, as produced by a scan
///
/// Immutable once produced; the next scan supersedes it.
#[derive(Debug, Clone)]
pub struct SecretDocument {
    /// Logical name, e.g. `app/dev`
    pub name: String,
    pub payload: Payload,
    pub format: SourceFormat,
    pub format_version: u32,
    /// Checksum of the canonicalized payload
    pub checksum: Checksum,
    /// Path relative to the scan root
    pub source_path: PathBuf,
}

impl SecretDocument {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        payload: Payload,
        format: SourceFormat,
        format_version: u32,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        let checksum = payload.checksum();
        Self {
            name: name.into(),
            payload,
            format,
            format_version,
            checksum,
            source_path: source_path.into(),
        }
    }
}

/// Observed state of one remote secret, without its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSecretState {
    pub name: String,
    pub version: VersionToken,
    /// Backends that do not store our checksum report `None`
    #[serde(default)]
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}
