use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

/// Lifecycle state of a client-side upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl SessionStatus {
    /// Completed and cancelled sessions never change again.
    pub fn is_terminal(self) -> bool {
        match self {
            SessionStatus::Completed | SessionStatus::Cancelled => true,
            SessionStatus::Pending
            | SessionStatus::Uploading
            | SessionStatus::Paused
            | SessionStatus::Error => false,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Cancelled)
                | (Uploading, Paused)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Uploading, Cancelled)
                | (Paused, Uploading)
                | (Paused, Cancelled)
                | (Error, Uploading)
                | (Error, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared total length of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadLength {
    Known(u64),
    /// `Upload-Defer-Length: 1`; the length arrives with a later append.
    Deferred,
}

impl UploadLength {
    pub fn known(self) -> Option<u64> {
        match self {
            UploadLength::Known(n) => Some(n),
            UploadLength::Deferred => None,
        }
    }
}

/// One entry of the uploads listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// `None` while the length is deferred.
    pub size: Option<u64>,
    pub offset: u64,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    /// Retrieval path, present once the upload is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// JSON body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Authoritative offset, set on conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uploads_dir: String,
}
