//! In-memory transport for coordinator and worker tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chunkline_protocol::Metadata;
use chunkline_transfer::sha256_digest;
use tokio::sync::Semaphore;

use crate::error::ClientError;
use crate::transport::{Appended, Created, TransportFuture, UploadState, UploadTransport};

pub(crate) const UPLOAD_URL: &str = "http://mock/api/uploads/u1";
pub(crate) const DOWNLOAD_URL: &str = "http://mock/api/download/u1";

/// What the next append does. Consumed one per append.
pub(crate) enum Fault {
    /// Behave normally.
    Skip,
    /// Fail without storing anything.
    Before(ClientError),
    /// Store the bytes, then fail as if the response was lost.
    AfterStore(ClientError),
}

#[derive(Default)]
struct MockState {
    exists: bool,
    length: u64,
    metadata: Metadata,
    stored: Vec<u8>,
    faults: VecDeque<Fault>,
    attempts: Vec<u64>,
    queries: usize,
    terminated: bool,
}

/// Single-upload server held in memory.
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
    gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            gate: None,
        }
    }

    /// An upload that already exists on the server.
    pub(crate) fn existing(length: u64, stored: Vec<u8>) -> Self {
        let transport = Self::new().with_stored(stored);
        {
            let mut state = transport.state.lock().unwrap();
            state.exists = true;
            state.length = length;
        }
        transport
    }

    /// Bytes the server holds without the client having seen them acknowledged.
    pub(crate) fn with_stored(self, stored: Vec<u8>) -> Self {
        self.state.lock().unwrap().stored = stored;
        self
    }

    /// Lets only `permits` appends through until [`MockTransport::open_gate`].
    pub(crate) fn gated(mut self, permits: usize) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(permits)));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub(crate) fn push_fault(&self, fault: Fault) {
        self.state.lock().unwrap().faults.push_back(fault);
    }

    /// Offsets of every append that reached the server.
    pub(crate) fn attempts(&self) -> Vec<u64> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub(crate) fn stored(&self) -> Vec<u8> {
        self.state.lock().unwrap().stored.clone()
    }

    pub(crate) fn queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    /// Metadata sent with the most recent create.
    pub(crate) fn created_metadata(&self) -> Metadata {
        self.state.lock().unwrap().metadata.clone()
    }

    pub(crate) fn terminated(&self) -> bool {
        self.state.lock().unwrap().terminated
    }
}

impl UploadTransport for MockTransport {
    fn create<'a>(
        &'a self,
        _endpoint: &'a str,
        length: u64,
        metadata: &'a Metadata,
    ) -> TransportFuture<'a, Created> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.exists = true;
            state.length = length;
            state.metadata = metadata.clone();
            Ok(Created {
                upload_url: UPLOAD_URL.into(),
                location: (length == 0).then(|| DOWNLOAD_URL.to_string()),
            })
        })
    }

    fn append<'a>(
        &'a self,
        _upload_url: &'a str,
        offset: u64,
        data: Bytes,
        checksum: [u8; 32],
    ) -> TransportFuture<'a, Appended> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let mut state = self.state.lock().unwrap();
            state.attempts.push(offset);
            if !state.exists {
                return Err(ClientError::NotFound);
            }

            let fault = state.faults.pop_front().unwrap_or(Fault::Skip);
            let after = match fault {
                Fault::Skip => None,
                Fault::Before(e) => return Err(e),
                Fault::AfterStore(e) => Some(e),
            };

            let current = state.stored.len() as u64;
            if offset != current {
                return Err(ClientError::Conflict { offset: current });
            }
            assert_eq!(sha256_digest(&data), checksum, "chunk checksum");
            state.stored.extend_from_slice(&data);
            if let Some(e) = after {
                return Err(e);
            }

            let offset = state.stored.len() as u64;
            Ok(Appended {
                offset,
                location: (offset == state.length).then(|| DOWNLOAD_URL.to_string()),
            })
        })
    }

    fn query_offset<'a>(&'a self, _upload_url: &'a str) -> TransportFuture<'a, UploadState> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.queries += 1;
            if !state.exists {
                return Err(ClientError::NotFound);
            }
            let offset = state.stored.len() as u64;
            Ok(UploadState {
                offset,
                length: Some(state.length),
                location: (offset == state.length).then(|| DOWNLOAD_URL.to_string()),
            })
        })
    }

    fn terminate<'a>(&'a self, _upload_url: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if !state.exists {
                return Err(ClientError::NotFound);
            }
            state.exists = false;
            state.terminated = true;
            Ok(())
        })
    }
}
