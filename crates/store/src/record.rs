use chrono::{DateTime, Utc};
use chunkline_protocol::constants::{META_FILENAME, META_FILETYPE};
use chunkline_protocol::{Metadata, UploadLength};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Server-side record of one upload, stored as the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUpload {
    pub id: String,
    /// Bytes durably written so far.
    pub offset: u64,
    /// Declared total length; `None` while deferred.
    pub size: Option<u64>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl PersistedUpload {
    pub fn new(id: String, length: UploadLength, metadata: Metadata) -> Self {
        Self {
            id,
            offset: 0,
            size: length.known(),
            metadata,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    pub fn length(&self) -> UploadLength {
        match self.size {
            Some(n) => UploadLength::Known(n),
            None => UploadLength::Deferred,
        }
    }

    /// All declared bytes have arrived.
    pub fn is_full(&self) -> bool {
        self.size == Some(self.offset)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(META_FILENAME).map(String::as_str)
    }

    pub fn filetype(&self) -> Option<&str> {
        self.metadata.get(META_FILETYPE).map(String::as_str)
    }
}

/// Generates `<unix-millis>_<random>` with an optional sanitized suffix.
pub fn generate_upload_id(suffix: Option<&str>) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let millis = Utc::now().timestamp_millis();
    match suffix {
        Some(name) if !name.is_empty() => format!("{millis}_{random}_{name}"),
        _ => format!("{millis}_{random}"),
    }
}
