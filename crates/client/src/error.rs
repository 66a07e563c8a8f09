//! Client error types.

/// Errors produced while talking to an upload server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server holds a different offset than the one we sent.
    #[error("offset conflict, server is at {offset}")]
    Conflict { offset: u64 },

    #[error("upload not found on server")]
    NotFound,

    #[error("server rejected chunk checksum")]
    Checksum,

    /// Timeouts, dropped connections and 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The server answered with something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("source file is {actual} bytes, expected {expected}")]
    SourceChanged { expected: u64, actual: u64 },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkline_transfer::TransferError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("worker stopped")]
    WorkerStopped,
}

impl ClientError {
    /// Whether the failed operation may be retried after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_) | ClientError::Checksum)
    }
}
