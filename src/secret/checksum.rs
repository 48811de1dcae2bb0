//! # Payload Checksums
//!
//! SHA-256 over the canonical form of a payload: entries in key order, each key
//! and value length-prefixed so `{"ab": "c"}` and `{"a": "bc"}` never collide.

use crate::secret::Payload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const CHECKSUM_PREFIX: &str = "sha256:";

/// Checksum of a canonicalized payload, rendered as `sha256:<hex>`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    #[must_use]
    pub fn of_payload(payload: &Payload) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in payload.iter() {
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.expose().as_bytes());
        }
        Self(format!("{CHECKSUM_PREFIX}{:x}", hasher.finalize()))
    }

    /// Wrap a checksum reported by a backend. Backends echo back what we sent,
    /// so no validation beyond trimming is done here.
    #[must_use]
    pub fn from_reported(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_insertion_order_independent() {
        let mut first = Payload::new();
        first.insert("A", "1");
        first.insert("B", "2");

        let mut second = Payload::new();
        second.insert("B", "2");
        second.insert("A", "1");

        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn test_checksum_changes_with_value() {
        let one: Payload = [("A", "1")].into_iter().collect();
        let two: Payload = [("A", "2")].into_iter().collect();
        assert_ne!(one.checksum(), two.checksum());
    }

    #[test]
    fn test_checksum_length_prefix_prevents_collisions() {
        let left: Payload = [("ab", "c")].into_iter().collect();
        let right: Payload = [("a", "bc")].into_iter().collect();
        assert_ne!(left.checksum(), right.checksum());
    }

    #[test]
    fn test_checksum_format() {
        let checksum = Payload::new().checksum();
        assert!(checksum.as_str().starts_with("sha256:"));
        assert_eq!(checksum.as_str().len(), "sha256:".len() + 64);
    }
}
