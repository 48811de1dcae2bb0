//! # File Finder
//!
//! Discovers secret documents in a source tree and derives their logical names.
//!
//! `app/dev.sops.yaml` under the root becomes `app/dev` (or `{prefix}/app/dev`).

use crate::constants::MAX_LOGICAL_NAME_LEN;
use crate::controller::parser::error::{ScanError, SourceError};
use crate::secret::SourceFormat;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

/// Suffixes marking an encrypted document, stripped after the format extension
const ENCRYPTION_MARKERS: &[&str] = &[".sops", ".enc"];

static NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9/_+=.@-]+$").expect("Failed to compile logical name regex")
});

/// A candidate source document found by the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative: PathBuf,
    pub format: SourceFormat,
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Find every supported document under `root`, in sorted order
///
/// Hidden files and directories (`.git`, `.sops.yaml`, ...) are skipped, as are
/// files with unsupported extensions. Any walk error fails the whole scan:
/// names below an unreadable directory are unknown and could otherwise be pruned.
pub fn find_source_files(root: &Path) -> Result<Vec<SourceFile>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::RootUnreadable {
            path: root.to_path_buf(),
            detail: "not a directory".to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|source| SourceError::Walk {
            path: source
                .path()
                .map_or_else(|| root.to_path_buf(), Path::to_path_buf),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(format) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(SourceFormat::from_extension)
        else {
            debug!("Ignoring unsupported file: {}", path.display());
            continue;
        };

        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative,
            format,
        });
    }

    Ok(files)
}

/// Derive the logical name of a document from its path relative to the root
///
/// Strips the format extension, then one encryption marker (`.sops`, `.enc`),
/// joins components with `/` and prepends `prefix` as a leading segment.
pub fn logical_name(relative: &Path, prefix: Option<&str>) -> Result<String, ScanError> {
    let mut segments = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(ScanError::InvalidName {
                name: relative.display().to_string(),
                reason: "path escapes the source root".to_string(),
            });
        };
        let part = part.to_str().ok_or_else(|| ScanError::InvalidName {
            name: relative.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        segments.push(part);
    }

    let file_name = segments.pop().unwrap_or_default();
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _extension)| stem);
    let stem = ENCRYPTION_MARKERS
        .iter()
        .find_map(|marker| stem.strip_suffix(marker))
        .unwrap_or(stem);
    segments.push(stem);

    let name = segments.join("/");
    Ok(match prefix.map(|p| p.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
        _ => name,
    })
}

/// Check that a logical name is acceptable to remote stores
pub fn validate_name(name: &str) -> Result<(), ScanError> {
    let invalid = |reason: &str| ScanError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() > MAX_LOGICAL_NAME_LEN {
        return Err(invalid(&format!(
            "longer than {MAX_LOGICAL_NAME_LEN} characters"
        )));
    }
    if !NAME_CHARS.is_match(name) {
        return Err(invalid(
            "only letters, digits and / _ + = . @ - are allowed",
        ));
    }
    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("empty, '.' or '..' path segment"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_logical_name_strips_extension_and_marker() {
        let cases = [
            ("app/dev.sops.yaml", None, "app/dev"),
            ("app/dev.yaml", None, "app/dev"),
            ("app/dev.enc.json", None, "app/dev"),
            ("db.env", None, "db"),
            ("team/svc/config.properties", None, "team/svc/config"),
            ("app/dev.sops.yaml", Some("prod"), "prod/app/dev"),
            ("app/dev.sops.yaml", Some("/prod/"), "prod/app/dev"),
            ("app/dev.sops.yaml", Some(""), "app/dev"),
        ];
        for (path, prefix, expected) in cases {
            assert_eq!(
                logical_name(Path::new(path), prefix).unwrap(),
                expected,
                "{path}"
            );
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("app/dev").is_ok());
        assert!(validate_name("team@corp/db.password+v2=x_y-z").is_ok());

        for bad in ["", "/app", "app/", "app//dev", "app dev", "app/../dev", "äpp"] {
            assert!(
                matches!(validate_name(bad), Err(ScanError::InvalidName { .. })),
                "{bad:?} should be invalid"
            );
        }
        assert!(validate_name(&"a".repeat(MAX_LOGICAL_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_find_source_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("b/x.yaml"), "k: v").unwrap();
        fs::write(root.join("a/y.env"), "K=V").unwrap();
        fs::write(root.join("a/README.md"), "docs").unwrap();
        fs::write(root.join(".sops.yaml"), "creation_rules: []").unwrap();
        fs::write(root.join(".git/config.yaml"), "k: v").unwrap();
        fs::write(root.join("a/.hidden.json"), "{}").unwrap();

        let files = find_source_files(root).unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            relative,
            vec![PathBuf::from("a/y.env"), PathBuf::from("b/x.yaml")]
        );
        assert_eq!(files[0].format, SourceFormat::Dotenv);
    }

    #[test]
    fn test_find_source_files_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            find_source_files(&missing),
            Err(SourceError::RootUnreadable { .. })
        ));
    }
}
