use anyhow::{anyhow, Context, Result};
use lopdf::{Dictionary, Object, StringFormat};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Document information entries, e.g. `Title -> "Handbook of Ultrasonics"`.
pub type Metadata = BTreeMap<String, String>;

const KEY_MARKER: char = '/';

/// Prefixes `key` with the PDF name marker unless it already carries one.
pub fn normalize_metadata_key(key: &str) -> String {
    if key.starts_with(KEY_MARKER) {
        key.to_string()
    } else {
        format!("{}{}", KEY_MARKER, key)
    }
}

/// Parses a `KEY=VALUE` command line pair.
pub fn parse_metadata_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got \"{}\"", s))?;
    let key = key.trim();
    if key.is_empty() || key == "/" {
        return Err("Metadata key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

/// Reads a JSON object of string values.
pub fn load_metadata_file(path: &Path) -> Result<Metadata> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata file {}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| anyhow!("Metadata file {} is not a JSON object of strings: {}", path.display(), e))
}

/// Builds the document information dictionary. `lopdf` stores names without
/// the marker, so it is stripped again after normalization.
pub(crate) fn info_dictionary(metadata: &Metadata) -> Dictionary {
    let mut info = Dictionary::new();
    for (key, value) in metadata {
        let name = normalize_metadata_key(key.trim());
        if name.len() == KEY_MARKER.len_utf8() {
            warn!("Skipping metadata entry with an empty key (value \"{}\")", value);
            continue;
        }
        info.set(&name.as_bytes()[1..], text_string(value));
    }
    info
}

/// ASCII stays a literal string; anything else becomes UTF-16BE with a BOM.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
