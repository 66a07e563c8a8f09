//! `Upload-Metadata` codec.
//!
//! The header is a comma-separated list of `key base64(value)` pairs. A key
//! may appear without a value, in which case it decodes to the empty string.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::ProtocolError;

/// Decoded upload metadata. Ordered so encoding is deterministic.
pub type Metadata = BTreeMap<String, String>;

/// Encodes metadata into the header representation.
pub fn encode_metadata(metadata: &Metadata) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key} {}", STANDARD.encode(value.as_bytes()))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Decodes the header representation. An empty header is an empty map.
pub fn decode_metadata(header: &str) -> Result<Metadata, ProtocolError> {
    let mut out = Metadata::new();
    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (key, encoded) = match pair.split_once(' ') {
            Some((k, v)) => (k, v.trim()),
            None => (pair, ""),
        };
        validate_key(key)?;

        let value = if encoded.is_empty() {
            String::new()
        } else {
            let raw = STANDARD.decode(encoded).map_err(|e| {
                ProtocolError::InvalidMetadata(format!("value for '{key}' is not base64: {e}"))
            })?;
            String::from_utf8(raw).map_err(|_| {
                ProtocolError::InvalidMetadata(format!("value for '{key}' is not UTF-8"))
            })?
        };

        if out.insert(key.to_string(), value).is_some() {
            return Err(ProtocolError::InvalidMetadata(format!(
                "duplicate key '{key}'"
            )));
        }
    }
    Ok(out)
}

fn validate_key(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::InvalidMetadata("empty key".into()));
    }
    if !key.chars().all(|c| c.is_ascii_graphic() && c != ',') {
        return Err(ProtocolError::InvalidMetadata(format!(
            "key '{key}' contains invalid characters"
        )));
    }
    Ok(())
}
