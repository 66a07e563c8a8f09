//! tus 1.0.0 verbs: capabilities, create, append, query-offset, terminate.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use chunkline_protocol::constants::{
    CHECKSUM_ALGORITHM, OFFSET_OCTET_STREAM, PROTOCOL_VERSION, SUPPORTED_EXTENSIONS,
    TUS_CHECKSUM_ALGORITHM, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    UPLOAD_CHECKSUM, UPLOAD_DEFER_LENGTH, UPLOAD_EXPIRES, UPLOAD_LENGTH, UPLOAD_METADATA,
    UPLOAD_OFFSET,
};
use chunkline_protocol::{
    Metadata, UploadLength, decode_metadata, encode_metadata, parse_checksum, parse_u64,
};
use chunkline_store::{PersistedUpload, StoreError};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::hooks::spawn_finish_hook;
use crate::state::AppState;

/// Adds `Tus-Resumable` to every tus response.
pub async fn add_resumable_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(TUS_RESUMABLE),
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    response
}

/// `OPTIONS /api/uploads`
pub async fn options(State(state): State<AppState>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    set(headers, TUS_VERSION, HeaderValue::from_static(PROTOCOL_VERSION));
    set(
        headers,
        TUS_EXTENSION,
        HeaderValue::from_static(SUPPORTED_EXTENSIONS),
    );
    set(
        headers,
        TUS_CHECKSUM_ALGORITHM,
        HeaderValue::from_static(CHECKSUM_ALGORITHM),
    );
    if let Some(max) = state.config.max_size {
        set(headers, TUS_MAX_SIZE, HeaderValue::from(max));
    }
    response
}

/// `POST /api/uploads`
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    check_version(&headers)?;
    let length = parse_length(&headers)?;
    if let (Some(max), UploadLength::Known(size)) = (state.config.max_size, length)
        && size > max
    {
        return Err(ApiError::PayloadTooLarge(format!(
            "upload of {size} bytes exceeds maximum of {max}"
        )));
    }
    let metadata = match header_str(&headers, UPLOAD_METADATA)? {
        Some(raw) => decode_metadata(raw)?,
        None => Metadata::new(),
    };

    let upload = state.store.create(length, metadata).await?;
    info!(
        upload = %upload.id,
        size = ?upload.size,
        filename = upload.filename().unwrap_or("unknown"),
        "upload created"
    );

    let mut response = StatusCode::CREATED.into_response();
    let out = response.headers_mut();
    out.insert(
        header::LOCATION,
        header_value(&state.upload_url(&headers, &upload.id))?,
    );
    set(out, UPLOAD_OFFSET, HeaderValue::from(0u64));

    if upload.is_full() {
        // Zero-byte uploads are complete as soon as they exist.
        let finalized = state.store.finalize(&upload.id).await?;
        out.insert(
            header::CONTENT_LOCATION,
            header_value(&state.download_url(&headers, &upload.id))?,
        );
        spawn_finish_hook(state.hook.clone(), finalized);
    } else {
        set(out, UPLOAD_EXPIRES, expires_value(&state, &upload)?);
    }
    Ok(response)
}

/// `PATCH /api/uploads/{id}`
pub async fn append_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    check_version(&headers)?;

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str())?;
    if content_type.map(str::trim) != Some(OFFSET_OCTET_STREAM) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "expected {OFFSET_OCTET_STREAM}"
        )));
    }
    let offset = match header_str(&headers, UPLOAD_OFFSET)? {
        Some(raw) => parse_u64(UPLOAD_OFFSET, raw)?,
        None => return Err(ApiError::BadRequest("missing Upload-Offset".into())),
    };
    let checksum = header_str(&headers, UPLOAD_CHECKSUM)?
        .map(parse_checksum)
        .transpose()?;

    if let Some(raw) = header_str(&headers, UPLOAD_LENGTH)? {
        let size = parse_u64(UPLOAD_LENGTH, raw)?;
        if let Some(max) = state.config.max_size
            && size > max
        {
            return Err(ApiError::PayloadTooLarge(format!(
                "upload of {size} bytes exceeds maximum of {max}"
            )));
        }
        state
            .store
            .declare_length(&id, size)
            .await
            .map_err(|e| match e {
                e @ StoreError::ExceedsLength { .. } => ApiError::BadRequest(e.to_string()),
                e => e.into(),
            })?;
    }

    let new_offset = state
        .store
        .append(&id, offset, &body, checksum.as_deref())
        .await?;
    let upload = state.store.get(&id).await?;
    debug!(upload = %id, offset = new_offset, size = ?upload.size, "upload progress");

    let mut response = StatusCode::NO_CONTENT.into_response();
    let out = response.headers_mut();
    set(out, UPLOAD_OFFSET, HeaderValue::from(new_offset));

    if upload.is_full() {
        let finalized = state.store.finalize(&id).await?;
        out.insert(
            header::CONTENT_LOCATION,
            header_value(&state.download_url(&headers, &id))?,
        );
        spawn_finish_hook(state.hook.clone(), finalized);
    } else {
        set(out, UPLOAD_EXPIRES, expires_value(&state, &upload)?);
    }
    Ok(response)
}

/// `HEAD /api/uploads/{id}`
pub async fn query_offset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    check_version(&headers)?;
    let upload = state.store.get(&id).await?;

    let mut response = StatusCode::OK.into_response();
    let out = response.headers_mut();
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    set(out, UPLOAD_OFFSET, HeaderValue::from(upload.offset));
    match upload.length() {
        UploadLength::Known(size) => set(out, UPLOAD_LENGTH, HeaderValue::from(size)),
        UploadLength::Deferred => set(out, UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1")),
    }
    if !upload.metadata.is_empty() {
        set(
            out,
            UPLOAD_METADATA,
            header_value(&encode_metadata(&upload.metadata))?,
        );
    }
    if upload.is_finalized() {
        out.insert(
            header::CONTENT_LOCATION,
            header_value(&state.download_url(&headers, &id))?,
        );
    } else {
        set(out, UPLOAD_EXPIRES, expires_value(&state, &upload)?);
    }
    Ok(response)
}

/// `DELETE /api/uploads/{id}`
pub async fn terminate_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    check_version(&headers)?;
    state.store.remove(&id).await?;
    info!(upload = %id, "upload terminated");
    Ok(StatusCode::NO_CONTENT)
}

fn check_version(headers: &HeaderMap) -> ApiResult<()> {
    match header_str(headers, TUS_RESUMABLE)? {
        Some(version) if version.trim() != PROTOCOL_VERSION => {
            Err(ApiError::UnsupportedVersion(version.to_string()))
        }
        _ => Ok(()),
    }
}

fn parse_length(headers: &HeaderMap) -> ApiResult<UploadLength> {
    let length = header_str(headers, UPLOAD_LENGTH)?;
    let deferred = header_str(headers, UPLOAD_DEFER_LENGTH)?;
    match (length, deferred) {
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "Upload-Length and Upload-Defer-Length are exclusive".into(),
        )),
        (Some(raw), None) => Ok(UploadLength::Known(parse_u64(UPLOAD_LENGTH, raw)?)),
        (None, Some(raw)) if raw.trim() == "1" => Ok(UploadLength::Deferred),
        (None, Some(raw)) => Err(ApiError::BadRequest(format!(
            "Upload-Defer-Length must be 1, got '{raw}'"
        ))),
        (None, None) => Err(ApiError::BadRequest(
            "missing Upload-Length or Upload-Defer-Length".into(),
        )),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest(format!("header {name} is not ASCII")))
        })
        .transpose()
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ApiError::Internal(format!("bad header value: {e}")))
}

fn set(headers: &mut HeaderMap, name: &'static str, value: HeaderValue) {
    headers.insert(HeaderName::from_static(name), value);
}

/// `Upload-Expires` in HTTP date format.
fn expires_value(state: &AppState, upload: &PersistedUpload) -> ApiResult<HeaderValue> {
    let retention = chrono::Duration::from_std(state.config.retention())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let expires: DateTime<Utc> = upload
        .created_at
        .checked_add_signed(retention)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    header_value(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}
