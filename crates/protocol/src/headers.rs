//! Parsing helpers for individual tus header values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::ProtocolError;
use crate::constants::{CHECKSUM_ALGORITHM, UPLOAD_CHECKSUM};

/// Parses a non-negative byte count header such as `Upload-Offset`.
pub fn parse_u64(name: &'static str, value: &str) -> Result<u64, ProtocolError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidHeader {
            name,
            reason: format!("'{value}' is not a non-negative integer"),
        });
    }
    value.parse().map_err(|_| ProtocolError::InvalidHeader {
        name,
        reason: format!("'{value}' is out of range"),
    })
}

/// Formats an `Upload-Checksum` value from a raw digest.
pub fn format_checksum(digest: &[u8]) -> String {
    format!("{CHECKSUM_ALGORITHM} {}", STANDARD.encode(digest))
}

/// Parses an `Upload-Checksum` value into its raw digest.
///
/// Only sha256 is accepted.
pub fn parse_checksum(value: &str) -> Result<Vec<u8>, ProtocolError> {
    let (algorithm, encoded) =
        value
            .trim()
            .split_once(' ')
            .ok_or_else(|| ProtocolError::InvalidHeader {
                name: UPLOAD_CHECKSUM,
                reason: "expected '<algorithm> <base64>'".into(),
            })?;
    if !algorithm.eq_ignore_ascii_case(CHECKSUM_ALGORITHM) {
        return Err(ProtocolError::InvalidHeader {
            name: UPLOAD_CHECKSUM,
            reason: format!("unsupported algorithm '{algorithm}'"),
        });
    }
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::InvalidHeader {
            name: UPLOAD_CHECKSUM,
            reason: e.to_string(),
        })
}
