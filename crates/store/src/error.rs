//! Storage engine error types.

/// Errors produced by the upload store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("offset conflict: upload is at {current}")]
    Conflict { current: u64 },

    #[error("cannot allocate upload: {0}")]
    Allocation(String),

    #[error("chunk checksum mismatch")]
    Checksum,

    #[error("{end} bytes exceeds declared length {size}")]
    ExceedsLength { end: u64, size: u64 },

    #[error("upload length already declared as {size}")]
    LengthAlreadyDeclared { size: u64 },

    #[error("upload incomplete: {offset} of {size:?} bytes")]
    Incomplete { offset: u64, size: Option<u64> },

    #[error("invalid upload id: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
