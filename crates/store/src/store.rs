use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chunkline_protocol::constants::META_FILENAME;
use chunkline_protocol::{Metadata, UploadLength};
use chunkline_transfer::{sanitize_filename, validate_upload_id, verify_checksum};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{PersistedUpload, generate_upload_id};

/// Attempts at finding an unused id before giving up on a create.
const MAX_ID_ATTEMPTS: usize = 8;

/// Result of [`FileStore::finalize`].
#[derive(Debug, Clone)]
pub struct Finalized {
    pub upload: PersistedUpload,
    /// Path of the finished bytes.
    pub location: PathBuf,
    /// `false` when the upload had already been finalized.
    pub newly_finalized: bool,
}

struct Entry {
    upload: PersistedUpload,
    removed: bool,
}

/// File-backed upload store with a single writer per upload id.
pub struct FileStore {
    dir: PathBuf,
    uploads: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl FileStore {
    /// Opens (creating if needed) the store at `dir` and reloads every
    /// persisted record found there.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut uploads = HashMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();

            // Leftover temp file from an interrupted sidecar write.
            if name.starts_with('.') {
                let _ = fs::remove_file(entry.path()).await;
                continue;
            }
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };

            match load_record(&dir, id).await {
                Ok(Some(upload)) => {
                    uploads.insert(
                        id.to_string(),
                        Arc::new(Mutex::new(Entry {
                            upload,
                            removed: false,
                        })),
                    );
                }
                Ok(None) => {}
                Err(e) => warn!(upload = id, error = %e, "skipping unreadable upload record"),
            }
        }

        info!(dir = %dir.display(), uploads = uploads.len(), "upload store opened");
        Ok(Self {
            dir,
            uploads: RwLock::new(uploads),
        })
    }

    /// Directory holding the uploads.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the data file for `id`.
    pub fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Allocates a new empty upload.
    ///
    /// The id carries the sanitized `filename` metadata value when present.
    pub async fn create(
        &self,
        length: UploadLength,
        metadata: Metadata,
    ) -> Result<PersistedUpload, StoreError> {
        let suffix = metadata
            .get(META_FILENAME)
            .map(|name| sanitize_filename(name))
            .filter(|name| !name.is_empty());

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_upload_id(suffix.as_deref());
            let data_path = self.data_path(&id);

            let file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&data_path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::Allocation(e.to_string())),
            };
            file.sync_all()
                .await
                .map_err(|e| StoreError::Allocation(e.to_string()))?;
            drop(file);

            let upload = PersistedUpload::new(id.clone(), length, metadata);
            if let Err(e) = self.write_record(&upload).await {
                let _ = fs::remove_file(&data_path).await;
                return Err(StoreError::Allocation(e.to_string()));
            }

            self.uploads.write().await.insert(
                id.clone(),
                Arc::new(Mutex::new(Entry {
                    upload: upload.clone(),
                    removed: false,
                })),
            );
            info!(upload = %id, size = ?upload.size, "upload created");
            return Ok(upload);
        }

        Err(StoreError::Allocation(
            "no unused upload id after repeated attempts".into(),
        ))
    }

    /// Appends `data` at `offset` and returns the new offset.
    ///
    /// `offset` must equal the current offset. When `checksum` is given it
    /// is the raw SHA-256 digest the data must match; nothing is written on
    /// a mismatch.
    pub async fn append(
        &self,
        id: &str,
        offset: u64,
        data: &[u8],
        checksum: Option<&[u8]>,
    ) -> Result<u64, StoreError> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.removed {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let current = entry.upload.offset;
        if offset != current {
            debug!(upload = id, offset, current, "append offset conflict");
            return Err(StoreError::Conflict { current });
        }
        let end = current + data.len() as u64;
        if let Some(size) = entry.upload.size
            && end > size
        {
            return Err(StoreError::ExceedsLength { end, size });
        }
        if let Some(expected) = checksum {
            verify_checksum(data, expected).map_err(|_| StoreError::Checksum)?;
        }
        if data.is_empty() {
            return Ok(current);
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(self.data_path(id))
            .await?;
        // Drop anything a previously interrupted write left past the offset.
        file.set_len(current).await?;
        file.seek(SeekFrom::Start(current)).await?;
        file.write_all(data).await?;
        file.sync_data().await?;

        let mut updated = entry.upload.clone();
        updated.offset = end;
        self.write_record(&updated).await?;
        entry.upload = updated;

        debug!(upload = id, offset = end, len = data.len(), "chunk persisted");
        Ok(end)
    }

    /// Current offset of `id`.
    pub async fn offset(&self, id: &str) -> Result<u64, StoreError> {
        Ok(self.get(id).await?.offset)
    }

    /// Snapshot of the record for `id`.
    pub async fn get(&self, id: &str) -> Result<PersistedUpload, StoreError> {
        let entry = self.entry(id).await?;
        let entry = entry.lock().await;
        if entry.removed {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(entry.upload.clone())
    }

    /// Resolves a deferred length. Re-declaring the same length is a no-op.
    pub async fn declare_length(&self, id: &str, size: u64) -> Result<PersistedUpload, StoreError> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.removed {
            return Err(StoreError::NotFound(id.to_string()));
        }

        match entry.upload.size {
            Some(existing) if existing == size => return Ok(entry.upload.clone()),
            Some(existing) => return Err(StoreError::LengthAlreadyDeclared { size: existing }),
            None => {}
        }
        if size < entry.upload.offset {
            return Err(StoreError::ExceedsLength {
                end: entry.upload.offset,
                size,
            });
        }

        let mut updated = entry.upload.clone();
        updated.size = Some(size);
        self.write_record(&updated).await?;
        entry.upload = updated;

        info!(upload = id, size, "upload length declared");
        Ok(entry.upload.clone())
    }

    /// Marks a full upload as finished.
    pub async fn finalize(&self, id: &str) -> Result<Finalized, StoreError> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.removed {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if !entry.upload.is_full() {
            return Err(StoreError::Incomplete {
                offset: entry.upload.offset,
                size: entry.upload.size,
            });
        }

        let location = self.data_path(id);
        if entry.upload.is_finalized() {
            return Ok(Finalized {
                upload: entry.upload.clone(),
                location,
                newly_finalized: false,
            });
        }

        let mut updated = entry.upload.clone();
        updated.finalized_at = Some(Utc::now());
        self.write_record(&updated).await?;
        entry.upload = updated;

        info!(upload = id, size = entry.upload.offset, "upload finalized");
        Ok(Finalized {
            upload: entry.upload.clone(),
            location,
            newly_finalized: true,
        })
    }

    /// Deletes the record and its bytes.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.removed {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.remove_locked(id, &mut entry).await?;
        info!(upload = id, "upload removed");
        Ok(())
    }

    async fn remove_locked(&self, id: &str, entry: &mut Entry) -> Result<(), StoreError> {
        entry.removed = true;
        self.uploads.write().await.remove(id);
        // Sidecar first: a data file without a sidecar is never reloaded.
        remove_if_exists(&self.record_path(id)).await?;
        remove_if_exists(&self.data_path(id)).await?;
        Ok(())
    }

    /// Removes unfinished uploads created more than `retention` ago and
    /// returns their ids. Finalized uploads are kept.
    pub async fn expire(&self, retention: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.expire_before(cutoff).await
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut expired = Vec::new();
        for (id, entry) in self.snapshot().await {
            let mut entry = entry.lock().await;
            if entry.removed || entry.upload.is_finalized() || entry.upload.created_at > cutoff {
                continue;
            }
            self.remove_locked(&id, &mut entry).await?;
            info!(upload = %id, offset = entry.upload.offset, "expired unfinished upload");
            expired.push(id);
        }
        Ok(expired)
    }

    /// Every record, oldest first.
    pub async fn list(&self) -> Vec<PersistedUpload> {
        let mut out = Vec::new();
        for (_, entry) in self.snapshot().await {
            let entry = entry.lock().await;
            if !entry.removed {
                out.push(entry.upload.clone());
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Opens the bytes of a finalized upload for reading.
    pub async fn open_download(&self, id: &str) -> Result<(fs::File, PersistedUpload), StoreError> {
        let upload = self.get(id).await?;
        if !upload.is_finalized() {
            return Err(StoreError::Incomplete {
                offset: upload.offset,
                size: upload.size,
            });
        }
        let file = fs::File::open(self.data_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok((file, upload))
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Entry>>, StoreError> {
        validate_upload_id(id).map_err(|e| StoreError::InvalidId(e.to_string()))?;
        self.uploads
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn snapshot(&self) -> Vec<(String, Arc<Mutex<Entry>>)> {
        self.uploads
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Rewrites the sidecar via temp file, fsync, rename.
    async fn write_record(&self, upload: &PersistedUpload) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(upload)?;
        let temp_path = self
            .dir
            .join(format!(".{}.json.{}", upload.id, Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, self.record_path(&upload.id)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Loads the sidecar for `id`, reconciling it with the data file.
///
/// Returns `None` when `id` is not an upload (no data file next to it).
async fn load_record(dir: &Path, id: &str) -> Result<Option<PersistedUpload>, StoreError> {
    if validate_upload_id(id).is_err() {
        return Ok(None);
    }
    let data_len = match fs::metadata(dir.join(id)).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(upload = id, "sidecar without data file, ignoring");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let raw = fs::read(dir.join(format!("{id}.json"))).await?;
    let mut upload: PersistedUpload = serde_json::from_slice(&raw)?;
    if upload.id != id {
        return Err(StoreError::InvalidId(format!(
            "record for {} stored as {id}",
            upload.id
        )));
    }
    if data_len < upload.offset {
        warn!(
            upload = id,
            offset = upload.offset,
            data_len,
            "data file shorter than recorded offset, rewinding"
        );
        upload.offset = data_len;
        upload.finalized_at = None;
    }
    Ok(Some(upload))
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
