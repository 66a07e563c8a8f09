//! API error types.

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chunkline_protocol::constants::{STATUS_CHECKSUM_MISMATCH, UPLOAD_OFFSET};
use chunkline_protocol::{ErrorBody, ProtocolError};
use chunkline_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("offset conflict: upload is at {current}")]
    Conflict { current: u64 },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("chunk checksum mismatch")]
    ChecksumMismatch,

    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict { .. } => "offset_conflict",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::InsufficientStorage(_) => "insufficient_storage",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::UnsupportedVersion(_) => StatusCode::PRECONDITION_FAILED,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ChecksumMismatch => {
                StatusCode::from_u16(STATUS_CHECKSUM_MISMATCH).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("upload {id}")),
            StoreError::InvalidId(reason) => Self::NotFound(reason),
            StoreError::Conflict { current } => Self::Conflict { current },
            StoreError::Allocation(reason) => Self::InsufficientStorage(reason),
            StoreError::Checksum => Self::ChecksumMismatch,
            e @ StoreError::ExceedsLength { .. } => Self::PayloadTooLarge(e.to_string()),
            e @ StoreError::LengthAlreadyDeclared { .. } => Self::BadRequest(e.to_string()),
            e @ StoreError::Incomplete { .. } => Self::NotFound(e.to_string()),
            e @ (StoreError::Io(_) | StoreError::Json(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        }
        let offset = match &self {
            Self::Conflict { current } => Some(*current),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            offset,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(current) = offset {
            response.headers_mut().insert(
                HeaderName::from_static(UPLOAD_OFFSET),
                HeaderValue::from(current),
            );
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
