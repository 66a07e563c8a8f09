use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chunkline_protocol::{Metadata, ProgressPayload, SessionStatus, StatusPayload};

use crate::TransferError;
use crate::progress::{SpeedCalculator, estimate_remaining, percentage};

/// A chunk of file data for transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// Raw SHA-256 digest of `data`.
    pub checksum: [u8; 32],
}

/// Client-side state of one file transfer.
///
/// Owned by exactly one task at a time; every status change goes through a
/// checked transition.
#[derive(Debug, Clone)]
pub struct UploadSession {
    id: String,
    path: PathBuf,
    endpoint: String,
    upload_url: Option<String>,
    location: Option<String>,
    total_bytes: u64,
    uploaded_offset: u64,
    chunk_size: usize,
    status: SessionStatus,
    metadata: Metadata,
    retry_count: u32,
    speed: SpeedCalculator,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates a pending session for the file at `path`.
    pub fn new(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        endpoint: impl Into<String>,
        total_bytes: u64,
        chunk_size: usize,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            endpoint: endpoint.into(),
            upload_url: None,
            location: None,
            total_bytes,
            uploaded_offset: 0,
            chunk_size,
            status: SessionStatus::Pending,
            metadata,
            retry_count: 0,
            speed: SpeedCalculator::default(),
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Uses a custom speed sampling configuration.
    pub fn with_speed_calculator(mut self, speed: SpeedCalculator) -> Self {
        self.speed = speed;
        self
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), TransferError> {
        if !self.status.can_transition_to(next) {
            return Err(TransferError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Enters `Uploading` from pending, paused, or error (a retry).
    pub fn start(&mut self) -> Result<(), TransferError> {
        let retrying = self.status == SessionStatus::Error;
        self.transition(SessionStatus::Uploading)?;
        if retrying {
            self.retry_count = 0;
            self.last_error = None;
        }
        self.speed.reset();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), TransferError> {
        self.transition(SessionStatus::Paused)
    }

    pub fn cancel(&mut self) -> Result<(), TransferError> {
        self.transition(SessionStatus::Cancelled)
    }

    /// Records a final failure.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransferError> {
        self.transition(SessionStatus::Error)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Marks the transfer complete. Every byte must have been acknowledged.
    pub fn complete(&mut self, location: impl Into<String>) -> Result<(), TransferError> {
        if self.uploaded_offset != self.total_bytes {
            return Err(TransferError::OffsetOutOfRange {
                offset: self.uploaded_offset,
                size: self.total_bytes,
            });
        }
        self.transition(SessionStatus::Completed)?;
        self.location = Some(location.into());
        Ok(())
    }

    /// Advances the offset after the server accepted `len` bytes.
    ///
    /// Resets the retry budget.
    pub fn record_chunk(&mut self, len: u64) -> Result<u64, TransferError> {
        self.adopt_offset(self.uploaded_offset + len)?;
        self.retry_count = 0;
        self.speed.record(self.uploaded_offset);
        Ok(self.uploaded_offset)
    }

    /// Replaces the local offset with the server's authoritative value.
    pub fn adopt_offset(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.total_bytes {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                size: self.total_bytes,
            });
        }
        self.uploaded_offset = offset;
        Ok(())
    }

    /// Counts one more failed attempt and returns the new count.
    pub fn note_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub fn set_upload_url(&mut self, url: impl Into<String>) {
        self.upload_url = Some(url.into());
    }

    /// Current progress, using the last sampled speed.
    pub fn progress(&self) -> ProgressPayload {
        let speed = self.speed.bytes_per_second();
        ProgressPayload {
            uploaded_bytes: self.uploaded_offset,
            total_bytes: self.total_bytes,
            speed,
            remaining_time: estimate_remaining(self.remaining(), speed),
            percentage: percentage(self.uploaded_offset, self.total_bytes),
        }
    }

    pub fn status_payload(&self) -> StatusPayload {
        StatusPayload {
            uploaded_bytes: self.uploaded_offset,
            total_bytes: self.total_bytes,
            upload_url: self.upload_url.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn uploaded_offset(&self) -> u64 {
        self.uploaded_offset
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.uploaded_offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
