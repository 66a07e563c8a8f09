use crate::TransferError;

/// Longest filename suffix kept in a generated upload id.
const MAX_NAME_LEN: usize = 100;

/// Validates that an upload id is safe to use as a single path component.
///
/// Rejects:
/// - Empty ids and ids longer than 255 bytes
/// - Characters outside `[A-Za-z0-9._-]` (this covers `/`, `\` and NUL)
/// - A leading dot (hidden files, `.` and `..`)
/// - Any `..` sequence
pub fn validate_upload_id(id: &str) -> Result<(), TransferError> {
    if id.is_empty() {
        return Err(TransferError::InvalidId("empty id".into()));
    }
    if id.len() > 255 {
        return Err(TransferError::InvalidId(format!(
            "id longer than 255 bytes: {}",
            id.len()
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(TransferError::InvalidId(format!(
            "character {c:?} not allowed: {id}"
        )));
    }
    if id.starts_with('.') {
        return Err(TransferError::InvalidId(format!(
            "leading dot not allowed: {id}"
        )));
    }
    if id.contains("..") {
        return Err(TransferError::InvalidId(format!(
            "parent directory traversal not allowed: {id}"
        )));
    }
    Ok(())
}

/// Reduces a client-supplied filename to characters valid in an upload id.
///
/// Path components are stripped, other characters become `_`, and the result
/// is truncated. Returns an empty string when nothing usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut out: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out.trim_start_matches('.').to_string()
}
