//! Messages exchanged between the upload worker and its front end.
//!
//! Both directions serialize as `{"type": "...", "sessionId": "...", "payload": {...}}`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

// ---------------------------------------------------------------------------
// Commands (front end -> worker)
// ---------------------------------------------------------------------------

/// Everything needed to begin (or resume) transferring one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub path: PathBuf,
    /// Collection URL to create the upload at. Falls back to the worker's
    /// configured endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// URL of an upload created earlier. When set, the worker resumes it
    /// instead of creating a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    Start {
        session_id: String,
        payload: StartPayload,
    },
    Pause {
        session_id: String,
    },
    /// Continues a paused session, or retries one that failed.
    Resume {
        session_id: String,
    },
    Cancel {
        session_id: String,
    },
    /// Forgets a session that is not running, without contacting the server.
    Remove {
        session_id: String,
    },
}

impl Command {
    pub fn session_id(&self) -> &str {
        match self {
            Command::Start { session_id, .. }
            | Command::Pause { session_id }
            | Command::Resume { session_id }
            | Command::Cancel { session_id }
            | Command::Remove { session_id } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start { .. } => "START",
            Command::Pause { .. } => "PAUSE",
            Command::Resume { .. } => "RESUME",
            Command::Cancel { .. } => "CANCEL",
            Command::Remove { .. } => "REMOVE",
        }
    }
}

// ---------------------------------------------------------------------------
// Events (worker -> front end)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second.
    pub speed: f64,
    /// Seconds; 0 when unknown.
    pub remaining_time: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Where the finalized bytes can be retrieved.
    pub location: String,
    pub upload_url: String,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub uploaded_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

/// Carried by paused, resumed and cancelled events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    Progress {
        session_id: String,
        payload: ProgressPayload,
    },
    Complete {
        session_id: String,
        payload: CompletePayload,
    },
    Error {
        session_id: String,
        payload: ErrorPayload,
    },
    Paused {
        session_id: String,
        payload: StatusPayload,
    },
    Resumed {
        session_id: String,
        payload: StatusPayload,
    },
    Cancelled {
        session_id: String,
        payload: StatusPayload,
    },
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::Progress { session_id, .. }
            | Event::Complete { session_id, .. }
            | Event::Error { session_id, .. }
            | Event::Paused { session_id, .. }
            | Event::Resumed { session_id, .. }
            | Event::Cancelled { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Progress { .. } => "PROGRESS",
            Event::Complete { .. } => "COMPLETE",
            Event::Error { .. } => "ERROR",
            Event::Paused { .. } => "PAUSED",
            Event::Resumed { .. } => "RESUMED",
            Event::Cancelled { .. } => "CANCELLED",
        }
    }
}
