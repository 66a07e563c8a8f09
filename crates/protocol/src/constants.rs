//! Protocol constants: version, header names, and route paths.

/// tus protocol version spoken by both ends.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Extensions advertised in `Tus-Extension`.
pub const SUPPORTED_EXTENSIONS: &str =
    "creation,creation-defer-length,termination,checksum,expiration";

/// Only checksum algorithm accepted in `Upload-Checksum`.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

pub const TUS_RESUMABLE: &str = "tus-resumable";
pub const TUS_VERSION: &str = "tus-version";
pub const TUS_EXTENSION: &str = "tus-extension";
pub const TUS_MAX_SIZE: &str = "tus-max-size";
pub const TUS_CHECKSUM_ALGORITHM: &str = "tus-checksum-algorithm";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";
pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_METADATA: &str = "upload-metadata";
pub const UPLOAD_CHECKSUM: &str = "upload-checksum";
pub const UPLOAD_EXPIRES: &str = "upload-expires";

/// Content type required on append requests.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Non-standard status returned when `Upload-Checksum` does not match.
pub const STATUS_CHECKSUM_MISMATCH: u16 = 460;

/// Collection endpoint for the upload verbs.
pub const UPLOADS_PATH: &str = "/api/uploads";

/// Listing of persisted uploads.
pub const UPLOADS_INFO_PATH: &str = "/api/uploads-info";

/// Prefix for retrieval of finalized uploads.
pub const DOWNLOAD_PATH: &str = "/api/download";

pub const HEALTH_PATH: &str = "/health";

/// Metadata key carrying the original file name.
pub const META_FILENAME: &str = "filename";

/// Metadata key carrying the MIME type.
pub const META_FILETYPE: &str = "filetype";

/// Headers a browser front end must be allowed to send and read.
pub const TUS_HEADERS: [&str; 9] = [
    TUS_RESUMABLE,
    TUS_VERSION,
    TUS_EXTENSION,
    TUS_MAX_SIZE,
    UPLOAD_LENGTH,
    UPLOAD_DEFER_LENGTH,
    UPLOAD_OFFSET,
    UPLOAD_METADATA,
    UPLOAD_CHECKSUM,
];
