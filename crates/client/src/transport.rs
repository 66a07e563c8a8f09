//! Upload transport trait and its HTTP implementation.
//!
//! `UploadTransport` keeps the coordinator independent of the wire so it can
//! be driven by mocks in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use chunkline_protocol::constants::{
    OFFSET_OCTET_STREAM, STATUS_CHECKSUM_MISMATCH, TUS_RESUMABLE, UPLOAD_CHECKSUM,
    UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};
use chunkline_protocol::{
    ErrorBody, Metadata, PROTOCOL_VERSION, UploadInfo, encode_metadata, format_checksum,
    parse_u64,
};
use reqwest::header::{CONTENT_LOCATION, CONTENT_TYPE, HeaderMap, LOCATION};
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use crate::error::ClientError;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Result of a create request.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Absolute URL of the new upload.
    pub upload_url: String,
    /// Retrieval location, present when the upload was finalized at creation.
    pub location: Option<String>,
}

/// Result of an accepted append.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    pub offset: u64,
    /// Retrieval location, present when this append finalized the upload.
    pub location: Option<String>,
}

/// Server-side view of an upload, from a query-offset request.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadState {
    pub offset: u64,
    /// `None` while the length is deferred.
    pub length: Option<u64>,
    pub location: Option<String>,
}

/// Abstract connection to an upload server.
pub trait UploadTransport: Send + Sync {
    /// Allocates a new upload of `length` bytes at the collection `endpoint`.
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        length: u64,
        metadata: &'a Metadata,
    ) -> TransportFuture<'a, Created>;

    /// Sends `data` to be written at `offset`.
    fn append<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Bytes,
        checksum: [u8; 32],
    ) -> TransportFuture<'a, Appended>;

    /// Asks the server for its authoritative offset.
    fn query_offset<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, UploadState>;

    /// Deletes the upload on the server.
    fn terminate<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()>;
}

/// [`UploadTransport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chunkline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetches the server's upload listing from its `uploads-info` URL.
    pub async fn list_uploads(&self, info_url: &str) -> Result<Vec<UploadInfo>, ClientError> {
        let response = self.client.get(info_url).send().await.map_err(transient)?;
        let response = check_status(response).await?;
        Ok(response.json().await.map_err(transient)?)
    }

    async fn do_create(
        &self,
        endpoint: &str,
        length: u64,
        metadata: &Metadata,
    ) -> Result<Created, ClientError> {
        let mut request = self
            .client
            .post(endpoint)
            .header(TUS_RESUMABLE, PROTOCOL_VERSION)
            .header(UPLOAD_LENGTH, length);
        if !metadata.is_empty() {
            request = request.header(UPLOAD_METADATA, encode_metadata(metadata));
        }
        let response = check_status(request.send().await.map_err(transient)?).await?;

        let location = header(response.headers(), LOCATION.as_str())
            .ok_or_else(|| ClientError::Protocol("create response has no Location".into()))?;
        let upload_url = resolve(endpoint, location)?;
        let finished = header(response.headers(), CONTENT_LOCATION.as_str())
            .map(|l| resolve(&upload_url, l))
            .transpose()?;
        debug!(upload_url = %upload_url, length, "upload created");
        Ok(Created {
            upload_url,
            location: finished,
        })
    }

    async fn do_append(
        &self,
        upload_url: &str,
        offset: u64,
        data: Bytes,
        checksum: [u8; 32],
    ) -> Result<Appended, ClientError> {
        let response = self
            .client
            .patch(upload_url)
            .header(TUS_RESUMABLE, PROTOCOL_VERSION)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(UPLOAD_OFFSET, offset)
            .header(UPLOAD_CHECKSUM, format_checksum(&checksum))
            .body(data)
            .send()
            .await
            .map_err(transient)?;
        let response = check_status(response).await?;
        Ok(Appended {
            offset: required_offset(response.headers())?,
            location: header(response.headers(), CONTENT_LOCATION.as_str())
                .map(|l| resolve(upload_url, l))
                .transpose()?,
        })
    }

    async fn do_query_offset(&self, upload_url: &str) -> Result<UploadState, ClientError> {
        let response = self
            .client
            .head(upload_url)
            .header(TUS_RESUMABLE, PROTOCOL_VERSION)
            .send()
            .await
            .map_err(transient)?;
        let response = check_status(response).await?;
        let headers = response.headers();

        let length = match header(headers, UPLOAD_LENGTH) {
            Some(raw) => Some(parse_u64(UPLOAD_LENGTH, raw).map_err(protocol)?),
            None if header(headers, UPLOAD_DEFER_LENGTH).is_some() => None,
            None => {
                return Err(ClientError::Protocol(
                    "offset response carries no upload length".into(),
                ));
            }
        };
        Ok(UploadState {
            offset: required_offset(headers)?,
            length,
            location: header(headers, CONTENT_LOCATION.as_str())
                .map(|l| resolve(upload_url, l))
                .transpose()?,
        })
    }

    async fn do_terminate(&self, upload_url: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(upload_url)
            .header(TUS_RESUMABLE, PROTOCOL_VERSION)
            .send()
            .await
            .map_err(transient)?;
        check_status(response).await?;
        Ok(())
    }
}

impl UploadTransport for HttpTransport {
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        length: u64,
        metadata: &'a Metadata,
    ) -> TransportFuture<'a, Created> {
        Box::pin(self.do_create(endpoint, length, metadata))
    }

    fn append<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Bytes,
        checksum: [u8; 32],
    ) -> TransportFuture<'a, Appended> {
        Box::pin(self.do_append(upload_url, offset, data, checksum))
    }

    fn query_offset<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, UploadState> {
        Box::pin(self.do_query_offset(upload_url))
    }

    fn terminate<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(self.do_terminate(upload_url))
    }
}

/// Passes successful responses through and maps the rest to [`ClientError`].
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let header_offset = header(response.headers(), UPLOAD_OFFSET)
        .and_then(|raw| parse_u64(UPLOAD_OFFSET, raw).ok());
    // The body may be empty (HEAD) or not JSON.
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    Err(status_error(status, header_offset, body, text))
}

fn status_error(
    status: StatusCode,
    header_offset: Option<u64>,
    body: Option<ErrorBody>,
    text: String,
) -> ClientError {
    match status.as_u16() {
        404 | 410 => ClientError::NotFound,
        409 => match header_offset.or(body.as_ref().and_then(|b| b.offset)) {
            Some(offset) => ClientError::Conflict { offset },
            None => ClientError::Protocol("conflict response carries no offset".into()),
        },
        STATUS_CHECKSUM_MISMATCH => ClientError::Checksum,
        408 | 429 | 500 | 502 | 503 | 504 => ClientError::Transient(format!("server returned {status}")),
        code => ClientError::Rejected {
            status: code,
            message: body.map(|b| b.message).unwrap_or(text),
        },
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn required_offset(headers: &HeaderMap) -> Result<u64, ClientError> {
    let raw = header(headers, UPLOAD_OFFSET)
        .ok_or_else(|| ClientError::Protocol("response carries no Upload-Offset".into()))?;
    parse_u64(UPLOAD_OFFSET, raw).map_err(protocol)
}

/// Resolves a possibly relative `Location` against the URL it came from.
fn resolve(base: &str, location: &str) -> Result<String, ClientError> {
    let base = Url::parse(base).map_err(protocol)?;
    Ok(base.join(location).map_err(protocol)?.to_string())
}

fn transient(e: reqwest::Error) -> ClientError {
    ClientError::Transient(e.to_string())
}

fn protocol(e: impl std::fmt::Display) -> ClientError {
    ClientError::Protocol(e.to_string())
}
