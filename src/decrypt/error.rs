//! # Decryption Errors
//!
//! Error taxonomy for decryption and classification of `sops` failures.

use crate::constants::MAX_ERROR_DETAIL_LEN;
use thiserror::Error;

/// Why a document could not be decrypted
///
/// Details are derived from tool output and truncated; they never contain plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("key {key} unavailable: {detail}")]
    KeyUnavailable { key: String, detail: String },
    #[error("access denied to key {key}: {detail}")]
    AccessDenied { key: String, detail: String },
    #[error("corrupt ciphertext: {detail}")]
    CorruptCiphertext { detail: String },
}

impl DecryptError {
    /// Short stable identifier, used as a metric label and in reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyUnavailable { .. } => "key_unavailable",
            Self::AccessDenied { .. } => "access_denied",
            Self::CorruptCiphertext { .. } => "corrupt_ciphertext",
        }
    }

    /// Remediation guidance for operators
    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::KeyUnavailable { .. } => {
                "Check that the key exists and that credentials for its key management system are available to the reconciler"
            }
            Self::AccessDenied { .. } => {
                "Grant the reconciler's identity decrypt permission on the key (e.g. kms:Decrypt)"
            }
            Self::CorruptCiphertext { .. } => {
                "Re-encrypt the file with sops; it was modified outside sops or truncated"
            }
        }
    }
}

/// Truncate external error output so it cannot flood logs
pub(crate) fn truncate_detail(detail: &str) -> String {
    let detail = detail.trim();
    if detail.len() <= MAX_ERROR_DETAIL_LEN {
        return detail.to_string();
    }
    let mut end = MAX_ERROR_DETAIL_LEN;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &detail[..end])
}

/// Classify `sops` stderr output into a [`DecryptError`]
///
/// Access problems are checked first: sops wraps them in a generic
/// "failed to get the data key" message.
#[must_use]
pub fn classify_sops_error(stderr: &str, key: &str) -> DecryptError {
    let lower = stderr.to_lowercase();
    let detail = truncate_detail(stderr);

    const ACCESS_DENIED: &[&str] = &[
        "accessdenied",
        "access denied",
        "permission denied",
        "not authorized",
        "unauthorized",
        "forbidden",
        "403",
    ];
    const CORRUPT: &[&str] = &[
        "mac mismatch",
        "error unmarshalling",
        "error unmarshaling",
        "could not unmarshal",
        "invalid ciphertext",
        "corrupt",
        "message authentication failed",
        "sops metadata not found",
    ];

    if ACCESS_DENIED.iter().any(|p| lower.contains(p)) {
        return DecryptError::AccessDenied {
            key: key.to_string(),
            detail,
        };
    }
    if CORRUPT.iter().any(|p| lower.contains(p)) {
        return DecryptError::CorruptCiphertext { detail };
    }
    DecryptError::KeyUnavailable {
        key: key.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_access_denied() {
        let stderr = "Failed to get the data key required to decrypt the SOPS file.\n\
                      Group 0: FAILED\n  arn:aws:kms:eu-west-1:1:key/abc: FAILED\n\
                      - | AccessDeniedException: User is not authorized to perform kms:Decrypt";
        let err = classify_sops_error(stderr, "aws_kms:arn");
        assert_eq!(err.kind(), "access_denied");
    }

    #[test]
    fn test_classify_corrupt() {
        let err = classify_sops_error("Error: MAC mismatch. File has 1A, computed 2B", "age:x");
        assert_eq!(err.kind(), "corrupt_ciphertext");
    }

    #[test]
    fn test_classify_defaults_to_key_unavailable() {
        let err = classify_sops_error("Failed to get the data key: no identity matched", "age:x");
        assert!(matches!(err, DecryptError::KeyUnavailable { .. }));
    }

    #[test]
    fn test_truncate_detail_long_output() {
        let long = "x".repeat(500);
        let truncated = truncate_detail(&long);
        assert!(truncated.ends_with("(truncated)"));
        assert!(truncated.len() < 250);
    }

    #[test]
    fn test_truncate_detail_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_detail(&long);
        assert!(truncated.ends_with("(truncated)"));
    }
}
