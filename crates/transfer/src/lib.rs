//! Chunked file transfer building blocks shared by the chunkline client and
//! server: chunk reading, SHA-256 checksums, speed sampling, retry schedules,
//! and the client-side upload session state machine.

mod chunked;
mod progress;
mod retry;
mod types;
mod validation;

pub use chunked::{ChunkReader, sha256_digest, verify_checksum};
pub use progress::{SpeedCalculator, estimate_remaining, percentage};
pub use retry::RetryPolicy;
pub use types::{Chunk, UploadSession};
pub use validation::{sanitize_filename, validate_upload_id};

use chunkline_protocol::SessionStatus;

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid upload id: {0}")]
    InvalidId(String),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("offset {offset} outside file of {size} bytes")]
    OffsetOutOfRange { offset: u64, size: u64 },
}
