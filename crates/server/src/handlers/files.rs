//! Read API: upload listing, downloads, health.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use chunkline_protocol::{HealthResponse, UploadInfo};
use chunkline_store::PersistedUpload;
use chunkline_transfer::sanitize_filename;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /api/uploads-info`
pub async fn list_uploads(State(state): State<AppState>) -> Json<Vec<UploadInfo>> {
    let uploads = state.store.list().await;
    Json(uploads.into_iter().map(upload_info).collect())
}

fn upload_info(upload: PersistedUpload) -> UploadInfo {
    let complete = upload.is_finalized();
    UploadInfo {
        filename: upload.filename().map(str::to_string),
        size: upload.size,
        offset: upload.offset,
        complete,
        created_at: upload.created_at,
        finalized_at: upload.finalized_at,
        url: complete.then(|| AppState::download_path(&upload.id)),
        id: upload.id,
        metadata: upload.metadata,
    }
}

/// `GET /api/download/{id}`
///
/// Streams the bytes of a finalized upload; anything else is 404.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (file, upload) = state.store.open_download(&id).await?;

    let filename = upload
        .filename()
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| upload.id.clone());
    let content_type = upload
        .filetype()
        .and_then(|t| HeaderValue::from_str(t).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, HeaderValue::from(upload.offset)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        timestamp: Utc::now(),
        uploads_dir: state.store.dir().display().to_string(),
    })
}
