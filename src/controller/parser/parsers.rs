//! # Parsers
//!
//! Parse plaintext documents (yaml, json, dotenv, properties) into a flat [`Payload`].
//!
//! **SECURITY**: all parsing happens on in-memory buffers. Parse errors only
//! report positions, never the offending text, since it may be a secret value.

use crate::controller::parser::error::ScanError;
use crate::secret::{Payload, SecretValue, SourceFormat};

/// `apiVersion` prefix of the envelope form
pub const ENVELOPE_API_PREFIX: &str = "secret-reconciler/v";

/// Newest envelope format version understood by this build
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// A parsed document: flat payload plus its format version
#[derive(Debug)]
pub struct ParsedDocument {
    pub payload: Payload,
    pub format_version: u32,
}

/// Parse a plaintext document of the given format
pub fn parse_document(content: &str, format: SourceFormat) -> Result<ParsedDocument, ScanError> {
    match format {
        SourceFormat::Yaml => {
            let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
                ScanError::malformed(format, describe_yaml_error(&e))
            })?;
            parse_structured(value, format)
        }
        SourceFormat::Json => {
            // serde_yaml::Value deserializes from any format, so JSON shares the yaml path
            let value: serde_yaml::Value = serde_json::from_str(content).map_err(|e| {
                ScanError::malformed(
                    format,
                    format!("{:?} error at line {} column {}", e.classify(), e.line(), e.column()),
                )
            })?;
            parse_structured(value, format)
        }
        SourceFormat::Dotenv => Ok(ParsedDocument {
            payload: parse_env(content)?,
            format_version: SUPPORTED_FORMAT_VERSION,
        }),
        SourceFormat::Properties => Ok(ParsedDocument {
            payload: parse_properties(content)?,
            format_version: SUPPORTED_FORMAT_VERSION,
        }),
    }
}

fn describe_yaml_error(error: &serde_yaml::Error) -> String {
    match error.location() {
        Some(location) => format!(
            "syntax error at line {} column {}",
            location.line(),
            location.column()
        ),
        None => "syntax error".to_string(),
    }
}

/// Handle both a flat mapping and the `{apiVersion, data}` envelope
fn parse_structured(
    value: serde_yaml::Value,
    format: SourceFormat,
) -> Result<ParsedDocument, ScanError> {
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        // An empty yaml file parses to null
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        _ => {
            return Err(ScanError::malformed(
                format,
                "top level must be a mapping",
            ));
        }
    };

    let (body, format_version) = match envelope_version(&mapping, format)? {
        Some(version) => {
            let data = mapping
                .get("data")
                .cloned()
                .unwrap_or(serde_yaml::Value::Null);
            match data {
                serde_yaml::Value::Mapping(data) => (data, version),
                serde_yaml::Value::Null => (serde_yaml::Mapping::new(), version),
                _ => return Err(ScanError::malformed(format, "envelope data must be a mapping")),
            }
        }
        None => (mapping, SUPPORTED_FORMAT_VERSION),
    };

    let mut payload = Payload::new();
    flatten_yaml_value(&serde_yaml::Value::Mapping(body), String::new(), &mut payload)
        .map_err(|key| ScanError::malformed(format, format!("duplicate flattened key {key:?}")))?;
    Ok(ParsedDocument {
        payload,
        format_version,
    })
}

/// Read the format version from an envelope, or `None` for a flat mapping
fn envelope_version(
    mapping: &serde_yaml::Mapping,
    format: SourceFormat,
) -> Result<Option<u32>, ScanError> {
    let Some(api_version) = mapping.get("apiVersion").and_then(serde_yaml::Value::as_str) else {
        return Ok(None);
    };
    let Some(version) = api_version.strip_prefix(ENVELOPE_API_PREFIX) else {
        return Ok(None);
    };
    let version: u32 = version.parse().map_err(|_| {
        ScanError::malformed(format, format!("invalid apiVersion {api_version:?}"))
    })?;
    if version != SUPPORTED_FORMAT_VERSION {
        return Err(ScanError::malformed(
            format,
            format!("unsupported format version {version} (supported: {SUPPORTED_FORMAT_VERSION})"),
        ));
    }
    Ok(Some(version))
}

fn key_to_string(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten nested mappings with `.` and sequences with `[i]`
///
/// Fails with the flattened key when two paths collapse onto it (`a.b` next to `a: {b}`).
pub(crate) fn flatten_yaml_value(
    value: &serde_yaml::Value,
    prefix: String,
    result: &mut Payload,
) -> Result<(), String> {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, val) in map {
                // Complex keys cannot be addressed by a flat name
                let Some(key_str) = key_to_string(key) else {
                    continue;
                };
                let new_prefix = if prefix.is_empty() {
                    key_str
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml_value(val, new_prefix, result)?;
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for (idx, val) in seq.iter().enumerate() {
                flatten_yaml_value(val, format!("{prefix}[{idx}]"), result)?;
            }
            Ok(())
        }
        serde_yaml::Value::String(s) => insert_flat(result, prefix, s.as_str()),
        serde_yaml::Value::Number(n) => insert_flat(result, prefix, n.to_string()),
        serde_yaml::Value::Bool(b) => insert_flat(result, prefix, b.to_string()),
        serde_yaml::Value::Null => insert_flat(result, prefix, String::new()),
        serde_yaml::Value::Tagged(tagged) => flatten_yaml_value(&tagged.value, prefix, result),
    }
}

fn insert_flat(result: &mut Payload, key: String, value: impl Into<SecretValue>) -> Result<(), String> {
    if result.get(&key).is_some() {
        return Err(key);
    }
    result.insert(key, value);
    Ok(())
}

/// Strip one pair of matching surrounding quotes
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Parse `KEY=VALUE` lines
///
/// Supports `#` comments, an optional `export ` prefix and quoted values.
/// Values are taken literally: `$VAR` is not expanded.
pub(crate) fn parse_env(content: &str) -> Result<Payload, ScanError> {
    let mut secrets = Payload::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();

        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(ScanError::malformed(
                SourceFormat::Dotenv,
                format!("line {} is not KEY=VALUE", idx + 1),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ScanError::malformed(
                SourceFormat::Dotenv,
                format!("line {} has an empty key", idx + 1),
            ));
        }
        secrets.insert(key, unquote(value.trim()));
    }

    Ok(secrets)
}

/// Parse Java-style properties: `key=value` or `key: value`, `#`/`!` comments
pub(crate) fn parse_properties(content: &str) -> Result<Payload, ScanError> {
    let mut properties = Payload::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();

        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let separator = line.find(['=', ':']);
        let Some(separator) = separator else {
            return Err(ScanError::malformed(
                SourceFormat::Properties,
                format!("line {} has no '=' or ':' separator", idx + 1),
            ));
        };
        let key = line[..separator].trim();
        if key.is_empty() {
            return Err(ScanError::malformed(
                SourceFormat::Properties,
                format!("line {} has an empty key", idx + 1),
            ));
        }
        properties.insert(key, line[separator + 1..].trim());
    }

    Ok(properties)
}
