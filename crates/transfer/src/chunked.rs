use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes the raw SHA-256 digest of `data`.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Checks `data` against an expected raw SHA-256 digest.
pub fn verify_checksum(data: &[u8], expected: &[u8]) -> Result<(), TransferError> {
    if sha256_digest(data).as_slice() == expected {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch)
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks, each carrying its SHA-256 digest.
///
/// Blocking; async callers move it in and out of `spawn_blocking`.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Repositions the reader at an authoritative offset.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.file_size {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                size: self.file_size,
            });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        // A short read means the file shrank underneath us.
        self.file.read_exact(&mut buf)?;

        let chunk = Chunk {
            offset: self.offset,
            checksum: sha256_digest(&buf),
            data: buf,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}
