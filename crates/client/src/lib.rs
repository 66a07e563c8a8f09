//! Resumable upload client.
//!
//! The crate is split the same way the upload flow is:
//!
//! - [`UploadTransport`] speaks the wire protocol; [`HttpTransport`] is the
//!   `reqwest` implementation.
//! - The coordinator drives one session's chunk loop, resyncing with the
//!   server after conflicts and transient failures.
//! - [`UploadWorker`] owns every session and is driven by
//!   [`Command`](chunkline_protocol::Command) messages, reporting back with
//!   [`Event`](chunkline_protocol::Event)s.

pub mod config;
mod coordinator;
pub mod error;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::ClientError;
pub use transport::{Appended, Created, HttpTransport, TransportFuture, UploadState, UploadTransport};
pub use worker::{UploadWorker, WorkerHandle, generate_session_id};
