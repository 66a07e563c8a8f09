//! Wire protocol types shared by the chunkline server and client.
//!
//! The HTTP surface is a subset of tus 1.0.0 (creation, defer-length,
//! termination, checksum, expiration). The worker message types describe the
//! contract between the background upload worker and whatever front end
//! drives it.

pub mod constants;
pub mod headers;
pub mod messages;
pub mod metadata;
pub mod types;

pub use constants::PROTOCOL_VERSION;
pub use headers::{format_checksum, parse_checksum, parse_u64};
pub use messages::{
    Command, CompletePayload, ErrorPayload, Event, ProgressPayload, StartPayload, StatusPayload,
};
pub use metadata::{Metadata, decode_metadata, encode_metadata};
pub use types::{ErrorBody, HealthResponse, SessionStatus, UploadInfo, UploadLength};

/// Errors produced while parsing protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },
}
