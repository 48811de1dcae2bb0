//! # Secret Source
//!
//! Scans a source tree (usually a git checkout) into [`SecretDocument`]s.
//!
//! ## Supported File Formats
//!
//! - **`.yaml` / `.yml` / `.json`**: mappings, flattened with `.` and `[i]`; optionally
//!   wrapped in an `{apiVersion: secret-reconciler/v1, data: {...}}` envelope
//! - **`.env`**: `KEY=value` lines
//! - **`.properties`**: Java properties format
//!
//! ## Features
//!
//! - **SOPS decryption**: encrypted documents are detected and handed to the
//!   configured [`Decryptor`] together with the key reference from their metadata
//! - **Partial results**: a broken file fails on its own; every other file still loads
//! - **Prune safety**: names of failed files are reported as unresolved so they are
//!   never deleted from the store
//!
//! **SECURITY**: decrypted content exists only in memory, never written to disk.

pub mod error;
pub mod file_finder;
pub mod parsers;

pub use error::{ScanError, SourceError};
pub use file_finder::{SourceFile, find_source_files, logical_name, validate_name};

use crate::constants::DEFAULT_MAX_SECRET_SIZE_BYTES;
use crate::decrypt::sops::{is_sops_encrypted, key_reference};
use crate::decrypt::{Ciphertext, Decryptor};
use crate::observability::metrics;
use crate::secret::SecretDocument;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header of a file that git-crypt has not decrypted
const GIT_CRYPT_HEADER: &[u8] = b"\0GITCRYPT\0";

/// Scanner settings
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Prepended to every logical name as a leading segment
    pub name_prefix: Option<String>,
    /// Largest accepted payload, summed over keys and values
    pub max_secret_size_bytes: usize,
    /// Set to `false` when the store rejects secrets without entries
    pub allow_empty_payload: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            name_prefix: None,
            max_secret_size_bytes: DEFAULT_MAX_SECRET_SIZE_BYTES,
            allow_empty_payload: true,
        }
    }
}

/// A file that produced no document
#[derive(Debug, Clone)]
pub struct ScanFailure {
    /// Path relative to the scan root
    pub path: PathBuf,
    /// Logical name the file would have produced, when it could be derived
    pub name: Option<String>,
    pub error: ScanError,
}

/// Outcome of a scan: loaded documents plus per-file failures
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Documents sorted by logical name
    pub documents: Vec<SecretDocument>,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    /// Names whose desired state is unknown because a file claiming them failed
    #[must_use]
    pub fn unresolved_names(&self) -> BTreeSet<String> {
        self.failures
            .iter()
            .filter_map(|f| f.name.clone())
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Discovers and loads secret documents under a root directory
#[derive(Clone)]
pub struct SecretSource {
    decryptor: Arc<dyn Decryptor>,
    options: SourceOptions,
}

impl std::fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSource")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SecretSource {
    #[must_use]
    pub fn new(decryptor: Arc<dyn Decryptor>, options: SourceOptions) -> Self {
        Self { decryptor, options }
    }

    #[must_use]
    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    #[must_use]
    pub fn decryptor(&self) -> Arc<dyn Decryptor> {
        Arc::clone(&self.decryptor)
    }

    /// Scan `root` into documents and per-file failures
    ///
    /// # Errors
    /// Returns [`SourceError`] only when the tree itself cannot be walked.
    pub async fn scan(&self, root: &Path) -> Result<ScanReport, SourceError> {
        let files = find_source_files(root)?;
        debug!("Found {} candidate files under {}", files.len(), root.display());

        let mut report = ScanReport::default();
        let mut by_name: BTreeMap<String, Vec<SourceFile>> = BTreeMap::new();

        for file in files {
            let name = logical_name(&file.relative, self.options.name_prefix.as_deref())
                .and_then(|name| validate_name(&name).map(|()| name));
            match name {
                Ok(name) => by_name.entry(name).or_default().push(file),
                Err(error) => report.failures.push(ScanFailure {
                    path: file.relative,
                    name: None,
                    error,
                }),
            }
        }

        for (name, mut claimants) in by_name {
            if claimants.len() > 1 {
                let paths: Vec<PathBuf> = claimants.iter().map(|f| f.relative.clone()).collect();
                warn!("Logical name {} is claimed by {} files", name, paths.len());
                for file in claimants {
                    report.failures.push(ScanFailure {
                        path: file.relative,
                        name: Some(name.clone()),
                        error: ScanError::DuplicateName {
                            name: name.clone(),
                            paths: paths.clone(),
                        },
                    });
                }
                continue;
            }

            let Some(file) = claimants.pop() else {
                continue;
            };
            match self.load(&name, &file).await {
                Ok(document) => report.documents.push(document),
                Err(error) => {
                    warn!(
                        "Failed to load {} ({}): {}",
                        file.relative.display(),
                        name,
                        error
                    );
                    report.failures.push(ScanFailure {
                        path: file.relative,
                        name: Some(name),
                        error,
                    });
                }
            }
        }

        for failure in &report.failures {
            metrics::increment_scan_failures(failure.error.kind());
        }
        info!(
            "Scanned {}: {} documents, {} failed files",
            root.display(),
            report.documents.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Read, decrypt and parse one file
    async fn load(&self, name: &str, file: &SourceFile) -> Result<SecretDocument, ScanError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| ScanError::Unreadable(e.to_string()))?;
        if bytes.starts_with(GIT_CRYPT_HEADER) {
            return Err(ScanError::Locked);
        }
        let content = String::from_utf8(bytes).map_err(|e| {
            ScanError::malformed(
                file.format,
                format!("not valid UTF-8 (at byte {})", e.utf8_error().valid_up_to()),
            )
        })?;

        let parsed = if is_sops_encrypted(&content) {
            debug!("Detected SOPS-encrypted file: {}", file.relative.display());
            let key_ref = key_reference(&content, file.format);
            let ciphertext = Ciphertext {
                content,
                format: file.format,
            };
            let plaintext = self.decryptor.decrypt(&ciphertext, &key_ref).await?;
            parsers::parse_document(&plaintext, file.format)?
        } else {
            parsers::parse_document(&content, file.format)?
        };

        let size = parsed.payload.size_bytes();
        if size > self.options.max_secret_size_bytes {
            return Err(ScanError::TooLarge {
                size,
                limit: self.options.max_secret_size_bytes,
            });
        }
        if parsed.payload.is_empty() && !self.options.allow_empty_payload {
            return Err(ScanError::EmptyPayload);
        }

        metrics::increment_documents_scanned(file.format.as_str());
        Ok(SecretDocument::new(
            name,
            parsed.payload,
            file.format,
            parsed.format_version,
            &file.relative,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::{DecryptError, DisabledDecryptor, KeyReference, Plaintext};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    const ENCRYPTED_YAML: &str = "API_KEY: ENC[AES256_GCM,data:abc,iv:x,tag:y,type:str]\nsops:\n    age:\n        - recipient: age1example\n    version: 3.8.1\n";

    /// Pretends to decrypt by returning a fixed document
    struct FixedDecryptor(&'static str);

    #[async_trait]
    impl Decryptor for FixedDecryptor {
        async fn decrypt(
            &self,
            _ciphertext: &Ciphertext,
            key_ref: &KeyReference,
        ) -> Result<Plaintext, DecryptError> {
            assert_eq!(key_ref.to_string(), "age:age1example");
            Ok(Zeroizing::new(self.0.to_string()))
        }
    }

    fn source() -> SecretSource {
        SecretSource::new(Arc::new(DisabledDecryptor), SourceOptions::default())
    }

    fn write(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_loads_plaintext_documents() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/dev.yaml", "API_KEY: abc\n");
        write(dir.path(), "db.env", "PASSWORD=x\n");

        let report = source().scan(dir.path()).await.unwrap();
        assert!(report.is_complete());
        let names: Vec<&str> = report.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["app/dev", "db"]);
        assert_eq!(report.documents[0].source_path, PathBuf::from("app/dev.yaml"));
    }

    #[tokio::test]
    async fn test_duplicate_names_fail_every_claimant() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/dev.sops.yaml", "A: 1\n");
        write(dir.path(), "app/dev.json", r#"{"A": "1"}"#);
        write(dir.path(), "app/prod.yaml", "A: 2\n");

        let report = source().scan(dir.path()).await.unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].name, "app/prod");
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.error.kind() == "duplicate_name"));
        assert_eq!(
            report.unresolved_names(),
            BTreeSet::from(["app/dev".to_string()])
        );
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_per_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/dev.sops.yaml", ENCRYPTED_YAML);
        write(dir.path(), "app/prod.yaml", "A: 2\n");

        let report = source().scan(dir.path()).await.unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.name.as_deref(), Some("app/dev"));
        assert_eq!(
            failure.error.as_decrypt_error().map(DecryptError::kind),
            Some("key_unavailable")
        );
    }

    #[tokio::test]
    async fn test_encrypted_documents_go_through_decryptor() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/dev.sops.yaml", ENCRYPTED_YAML);

        let source = SecretSource::new(
            Arc::new(FixedDecryptor("API_KEY: abc\n")),
            SourceOptions::default(),
        );
        let report = source.scan(dir.path()).await.unwrap();
        assert!(report.is_complete());
        let doc = &report.documents[0];
        assert_eq!(doc.name, "app/dev");
        assert_eq!(doc.payload.get("API_KEY").map(|v| v.expose()), Some("abc"));
    }

    #[tokio::test]
    async fn test_git_crypt_locked_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/dev.env", b"\0GITCRYPT\0\x01\x02binary");

        let report = source().scan(dir.path()).await.unwrap();
        assert_eq!(report.failures[0].error, ScanError::Locked);
    }

    #[tokio::test]
    async fn test_size_and_empty_guards() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "big.env", format!("BLOB={}\n", "x".repeat(100)));
        write(dir.path(), "empty.yaml", "{}\n");

        let strict = SecretSource::new(
            Arc::new(DisabledDecryptor),
            SourceOptions {
                name_prefix: Some("prod".to_string()),
                max_secret_size_bytes: 64,
                allow_empty_payload: false,
            },
        );
        let report = strict.scan(dir.path()).await.unwrap();
        let kinds: BTreeMap<String, &str> = report
            .failures
            .iter()
            .map(|f| (f.name.clone().unwrap(), f.error.kind()))
            .collect();
        assert_eq!(kinds.get("prod/big"), Some(&"too_large"));
        assert_eq!(kinds.get("prod/empty"), Some(&"empty_payload"));

        // Empty payloads are fine by default
        let report = source().scan(dir.path()).await.unwrap();
        assert!(report.documents.iter().any(|d| d.name == "empty" && d.payload.is_empty()));
    }

    #[tokio::test]
    async fn test_invalid_names_are_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad name.yaml", "A: 1\n");

        let report = source().scan(dir.path()).await.unwrap();
        assert!(report.documents.is_empty());
        assert_eq!(report.failures[0].error.kind(), "invalid_name");
    }
}
