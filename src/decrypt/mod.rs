//! # Decryption
//!
//! Capability boundary over external key management.
//!
//! The core never performs cryptography itself. A [`Decryptor`] receives the
//! ciphertext of a whole source document together with the key reference found
//! in its metadata and returns the plaintext document, or one of three failures.
//!
//! - [`sops::SopsDecryptor`]: pipes documents through the `sops` binary (KMS, age, PGP, ...)
//! - [`DisabledDecryptor`]: refuses to decrypt anything, for trees that must be plaintext

pub mod error;
pub mod sops;

pub use error::DecryptError;
pub use sops::SopsDecryptor;

use crate::secret::SourceFormat;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use zeroize::Zeroizing;

/// Decrypted document text, wiped from memory when dropped
pub type Plaintext = Zeroizing<String>;

/// Encrypted document as read from disk
#[derive(Debug, Clone)]
pub struct Ciphertext {
    pub content: String,
    pub format: SourceFormat,
}

/// Which key management system a key reference points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    AwsKms,
    GcpKms,
    AzureKeyVault,
    HashicorpVault,
    Age,
    Pgp,
    Unknown,
}

impl KeyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwsKms => "aws_kms",
            Self::GcpKms => "gcp_kms",
            Self::AzureKeyVault => "azure_kv",
            Self::HashicorpVault => "hc_vault",
            Self::Age => "age",
            Self::Pgp => "pgp",
            Self::Unknown => "unknown",
        }
    }
}

/// Reference to the key protecting a document (ARN, recipient, fingerprint, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReference {
    pub kind: KeyKind,
    pub id: String,
}

impl KeyReference {
    #[must_use]
    pub fn new(kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self::new(KeyKind::Unknown, "")
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            write!(f, "{}:{}", self.kind.as_str(), self.id)
        }
    }
}

/// Decrypts whole documents with an externally managed key
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` using the key identified by `key_ref`
    async fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        key_ref: &KeyReference,
    ) -> Result<Plaintext, DecryptError>;
}

/// Decryptor that rejects every document
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDecryptor;

#[async_trait]
impl Decryptor for DisabledDecryptor {
    async fn decrypt(
        &self,
        _ciphertext: &Ciphertext,
        key_ref: &KeyReference,
    ) -> Result<Plaintext, DecryptError> {
        Err(DecryptError::KeyUnavailable {
            key: key_ref.to_string(),
            detail: "decryption is disabled".to_string(),
        })
    }
}
