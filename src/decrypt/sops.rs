//! # SOPS Decryption
//!
//! Detects SOPS-encrypted documents and decrypts them with the sops binary.

use crate::decrypt::error::{classify_sops_error, truncate_detail};
use crate::decrypt::{Ciphertext, DecryptError, Decryptor, KeyKind, KeyReference, Plaintext};
use crate::observability::metrics;
use crate::secret::SourceFormat;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use zeroize::Zeroizing;

/// SOPS metadata groups, in the order a key reference is picked from them
const KEY_GROUPS: &[(&str, &str, KeyKind)] = &[
    ("kms", "arn", KeyKind::AwsKms),
    ("gcp_kms", "resource_id", KeyKind::GcpKms),
    ("azure_kv", "vault_url", KeyKind::AzureKeyVault),
    ("hc_vault", "vault_address", KeyKind::HashicorpVault),
    ("age", "recipient", KeyKind::Age),
    ("pgp", "fp", KeyKind::Pgp),
];

/// Check if content is SOPS-encrypted by looking for SOPS metadata
pub fn is_sops_encrypted(content: &str) -> bool {
    // YAML (and JSON, which parses as YAML) files carry a top-level "sops" key
    if let Ok(yaml) = serde_yaml::from_str::<serde_yaml::Value>(content) {
        if yaml
            .as_mapping()
            .and_then(|m| m.get(serde_yaml::Value::String("sops".to_string())))
            .is_some()
        {
            return true;
        }
    }

    // dotenv files flatten the metadata into sops_* keys
    if content
        .lines()
        .any(|line| line.trim_start().starts_with("sops_version=") || line.trim_start().starts_with("sops_mac="))
    {
        return true;
    }

    content.contains("ENC[AES256_GCM,")
}

/// Extract the first key reference from a document's SOPS metadata
#[must_use]
pub fn key_reference(content: &str, format: SourceFormat) -> KeyReference {
    match format {
        SourceFormat::Dotenv => dotenv_key_reference(content),
        _ => structured_key_reference(content),
    }
    .unwrap_or_else(KeyReference::unknown)
}

fn structured_key_reference(content: &str) -> Option<KeyReference> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let sops = yaml.get("sops")?;

    KEY_GROUPS.iter().find_map(|(group, field, kind)| {
        let id = sops
            .get(*group)?
            .as_sequence()?
            .first()?
            .get(*field)?
            .as_str()?;
        Some(KeyReference::new(*kind, id))
    })
}

fn dotenv_key_reference(content: &str) -> Option<KeyReference> {
    KEY_GROUPS.iter().find_map(|(group, field, kind)| {
        let prefix = format!("sops_{group}__list_0__map_{field}=");
        content.lines().find_map(|line| {
            line.trim()
                .strip_prefix(&prefix)
                .map(|id| KeyReference::new(*kind, id.trim()))
        })
    })
}

/// Decryptor backed by the `sops` binary
///
/// **SECURITY**: ciphertext is piped to sops over stdin and plaintext is read back
/// from stdout, so neither ever touches disk.
#[derive(Debug, Clone, Default)]
pub struct SopsDecryptor {
    binary: Option<PathBuf>,
}

impl SopsDecryptor {
    /// Use the first `sops` found in `PATH` (resolved on each call)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit sops binary
    #[must_use]
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(path.into()),
        }
    }

    fn resolve_binary(&self, key: &KeyReference) -> Result<PathBuf, DecryptError> {
        if let Some(path) = &self.binary {
            return Ok(path.clone());
        }
        which::which("sops").map_err(|e| DecryptError::KeyUnavailable {
            key: key.to_string(),
            detail: format!("sops binary not found in PATH: {e}"),
        })
    }

    async fn run_sops(
        &self,
        ciphertext: &Ciphertext,
        key_ref: &KeyReference,
    ) -> Result<Plaintext, DecryptError> {
        let sops_path = self.resolve_binary(key_ref)?;
        let sops_type = ciphertext
            .format
            .sops_type()
            .ok_or_else(|| DecryptError::CorruptCiphertext {
                detail: format!("sops cannot decrypt {} documents", ciphertext.format),
            })?;
        debug!("Using sops binary at: {:?}", sops_path);

        let mut cmd = tokio::process::Command::new(&sops_path);
        cmd.arg("--decrypt")
            .arg("--input-type")
            .arg(sops_type)
            .arg("--output-type")
            .arg(sops_type)
            .arg("/dev/stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |e: std::io::Error| DecryptError::KeyUnavailable {
            key: key_ref.to_string(),
            detail: format!("failed to spawn sops: {e}"),
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            let write = async {
                stdin.write_all(ciphertext.content.as_bytes()).await?;
                stdin.shutdown().await
            };
            write.await.map_err(|e| DecryptError::KeyUnavailable {
                key: key_ref.to_string(),
                detail: format!("failed to write to sops stdin: {e}"),
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DecryptError::KeyUnavailable {
                key: key_ref.to_string(),
                detail: format!("failed to wait for sops: {e}"),
            })?;

        if output.status.success() {
            let decrypted = String::from_utf8(output.stdout).map_err(|e| {
                let detail = format!("sops output is not valid UTF-8 (at byte {})", e.utf8_error().valid_up_to());
                // Wipe the raw bytes before dropping them
                let mut bytes = e.into_bytes();
                zeroize::Zeroize::zeroize(&mut bytes);
                DecryptError::CorruptCiphertext { detail }
            })?;
            Ok(Zeroizing::new(decrypted))
        } else {
            // Only stderr is inspected; stdout may hold partial plaintext
            let mut stdout = output.stdout;
            zeroize::Zeroize::zeroize(&mut stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut err = classify_sops_error(&stderr, &key_ref.to_string());
            if let DecryptError::KeyUnavailable { detail, .. } = &mut err {
                if detail.is_empty() {
                    *detail = truncate_detail(&format!("sops exited with {}", output.status));
                }
            }
            Err(err)
        }
    }
}

#[async_trait]
impl Decryptor for SopsDecryptor {
    async fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        key_ref: &KeyReference,
    ) -> Result<Plaintext, DecryptError> {
        let span = info_span!(
            "sops.decrypt",
            file.size = ciphertext.content.len(),
            file.format = %ciphertext.format,
            key.kind = key_ref.kind.as_str(),
        );
        let start = Instant::now();

        async move {
            let result = self.run_sops(ciphertext, key_ref).await;
            match &result {
                Ok(_) => {
                    metrics::increment_sops_decryption_total();
                    metrics::observe_sops_decryption_duration(start.elapsed().as_secs_f64());
                }
                Err(e) => {
                    debug!(error.kind = e.kind(), "sops decryption failed");
                    metrics::increment_sops_decryption_errors_total(e.kind());
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sops_encrypted_yaml() {
        let content = r"sops:
    kms:
    -   arn: arn:aws:kms:eu-west-1:123456789012:key/abcd
    lastmodified: '2024-01-01T00:00:00Z'
    mac: ENC[AES256_GCM,data:...,iv:...,tag:...,type:str]
    version: 3.8.0
DB_PASSWORD: ENC[AES256_GCM,data:...,iv:...,tag:...,type:str]";
        assert!(is_sops_encrypted(content));
    }

    #[test]
    fn test_is_sops_encrypted_json() {
        let content = r#"{"sops": {"version": "3.8.0"}, "A": "ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]"}"#;
        assert!(is_sops_encrypted(content));
    }

    #[test]
    fn test_is_sops_encrypted_dotenv() {
        let content = "A=ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]\nsops_version=3.8.0\n";
        assert!(is_sops_encrypted(content));
    }

    #[test]
    fn test_is_not_sops_encrypted_plain() {
        assert!(!is_sops_encrypted("data:\n  secret: plaintext_value"));
        assert!(!is_sops_encrypted("SECRET=plaintext_value"));
    }

    #[test]
    fn test_key_reference_from_yaml_kms() {
        let content = r"A: ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]
sops:
    kms:
    -   arn: arn:aws:kms:eu-west-1:123456789012:key/abcd
    age:
    -   recipient: age1xyz
    version: 3.8.0";
        let key = key_reference(content, SourceFormat::Yaml);
        assert_eq!(key.kind, KeyKind::AwsKms);
        assert_eq!(key.id, "arn:aws:kms:eu-west-1:123456789012:key/abcd");
    }

    #[test]
    fn test_key_reference_from_yaml_age_only() {
        let content = "A: ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]\nsops:\n  age:\n  - recipient: age1xyz\n";
        let key = key_reference(content, SourceFormat::Yaml);
        assert_eq!(key, KeyReference::new(KeyKind::Age, "age1xyz"));
    }

    #[test]
    fn test_key_reference_from_dotenv() {
        let content = "A=ENC[AES256_GCM,data:x,iv:y,tag:z,type:str]\n\
                       sops_kms__list_0__map_arn=arn:aws:kms:us-east-1:1:key/k\n\
                       sops_version=3.8.0\n";
        let key = key_reference(content, SourceFormat::Dotenv);
        assert_eq!(key.kind, KeyKind::AwsKms);
        assert_eq!(key.id, "arn:aws:kms:us-east-1:1:key/k");
    }

    #[test]
    fn test_key_reference_unknown_without_metadata() {
        let key = key_reference("A: b", SourceFormat::Yaml);
        assert_eq!(key.kind, KeyKind::Unknown);
    }

    #[tokio::test]
    async fn test_missing_sops_binary_is_key_unavailable() {
        let decryptor = SopsDecryptor::with_binary("/nonexistent/sops-binary");
        let ciphertext = Ciphertext {
            content: "sops:\n  version: 3.8.0\n".to_string(),
            format: SourceFormat::Yaml,
        };
        let err = decryptor
            .decrypt(&ciphertext, &KeyReference::unknown())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "key_unavailable");
    }
}
