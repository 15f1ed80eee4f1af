//! Resumable upload wire protocol
//!
//! Three request shapes, one request each, no retries:
//! - `POST ?uploadType=resumable` opens a session and returns its id
//! - `PUT ?upload_id=..` with `Content-Range: bytes */*` asks what the server has
//! - `PUT ?upload_id=..` with `Content-Range: bytes s-e/total` sends a chunk
//!
//! A 2xx reply means the file is complete, 308 means "keep going" with the
//! acknowledged bytes in the `Range` header, anything else is indeterminate.

use crate::engine::byte_reader;
use crate::error::UlmanError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use ulman_types::{mime_type_for, ByteRange, ChunkResult, Settings, TransferSession};
use url::Url;

/// Header carrying the session id on a successful initiation
pub const SESSION_ID_HEADER: &str = "x-guploader-uploadid";

/// Content-Range sent by a status probe: no bytes, total length unknown
pub const PROBE_CONTENT_RANGE: &str = "bytes */*";

/// Status the server uses for "incomplete, here is what I have"
pub const RESUME_INCOMPLETE: StatusCode = StatusCode::PERMANENT_REDIRECT;

/// The three operations of the resumable upload protocol
#[async_trait]
pub trait UploadProtocol: Send + Sync {
    /// Open a new upload session for `total_size` bytes and return its id
    async fn initiate_session(
        &self,
        source_path: &Path,
        destination_name: &str,
        total_size: u64,
        token: &str,
    ) -> Result<String, UlmanError>;

    /// Ask the server what it has received so far, without sending bytes
    async fn probe_status(&self, session_id: &str) -> Result<ChunkResult, UlmanError>;

    /// Send up to `chunk_size` bytes of the source starting at `start_byte`
    async fn upload_chunk(
        &self,
        session: &TransferSession,
        start_byte: u64,
        chunk_size: u64,
    ) -> Result<ChunkResult, UlmanError>;
}

/// HTTP implementation of [`UploadProtocol`]
#[derive(Clone, Debug)]
pub struct DriveClient {
    client: Client,
    endpoint: Url,
}

impl DriveClient {
    /// Create a client with the timeouts from `settings`
    pub fn new(settings: &Settings) -> Result<Self, UlmanError> {
        let client = Client::builder()
            .user_agent(concat!("ULMan/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            // 308 is a protocol reply here, never a redirect to follow
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UlmanError::InvalidOperation(e.to_string()))?;

        Self::with_client(client, &settings.endpoint)
    }

    /// Use an existing reqwest client
    pub fn with_client(client: Client, endpoint: &str) -> Result<Self, UlmanError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| UlmanError::InvalidOperation(format!("Invalid endpoint {}: {}", endpoint, e)))?;
        Ok(Self { client, endpoint })
    }

    fn initiation_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("uploadType", "resumable");
        url
    }

    fn session_url(&self, session_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("upload_id", session_id);
        url
    }
}

#[async_trait]
impl UploadProtocol for DriveClient {
    async fn initiate_session(
        &self,
        source_path: &Path,
        destination_name: &str,
        total_size: u64,
        token: &str,
    ) -> Result<String, UlmanError> {
        let mime = mime_type_for(source_path);

        info!(
            "Initiating upload session for {} as {} ({} bytes, {})",
            source_path.display(),
            destination_name,
            total_size,
            mime
        );

        let response = self
            .client
            .post(self.initiation_url())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Upload-Content-Type", mime)
            .header("X-Upload-Content-Length", total_size.to_string())
            .json(&serde_json::json!({ "name": destination_name }))
            .send()
            .await
            .map_err(UlmanError::from_request)?;

        let status = response.status();
        debug!("Initiation returned {}: {:?}", status, response.headers());

        if !status.is_success() {
            return Err(UlmanError::SessionInitiation {
                status: status.as_u16(),
            });
        }

        match session_id_from_headers(response.headers()) {
            Some(session_id) => {
                info!("Upload session created: {}", session_id);
                Ok(session_id)
            }
            None => {
                warn!("Initiation succeeded but no session id was returned");
                Err(UlmanError::SessionInitiation {
                    status: status.as_u16(),
                })
            }
        }
    }

    async fn probe_status(&self, session_id: &str) -> Result<ChunkResult, UlmanError> {
        let response = self
            .client
            .put(self.session_url(session_id))
            .header(CONTENT_LENGTH, "0")
            .header(CONTENT_RANGE, PROBE_CONTENT_RANGE)
            .send()
            .await
            .map_err(UlmanError::from_request)?;

        debug!("Probe returned {}: {:?}", response.status(), response.headers());
        classify(response.status(), response.headers(), None)
    }

    async fn upload_chunk(
        &self,
        session: &TransferSession,
        start_byte: u64,
        chunk_size: u64,
    ) -> Result<ChunkResult, UlmanError> {
        if chunk_size == 0 {
            return Err(UlmanError::InvalidChunkSize);
        }
        let total_size = session.total_size;
        if start_byte > total_size {
            return Err(UlmanError::InvalidOperation(format!(
                "Chunk start {} is past the end of a {} byte file",
                start_byte, total_size
            )));
        }

        let expected = chunk_size.min(total_size - start_byte);
        let data = byte_reader::read_range(&session.source_path, start_byte, expected).await?;
        if (data.len() as u64) < expected {
            return Err(UlmanError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank: read {} bytes at offset {}, expected {}",
                    session.source_path.display(),
                    data.len(),
                    start_byte,
                    expected
                ),
            )));
        }

        let content_range = content_range(start_byte, data.len() as u64, total_size);
        debug!(
            "Sending chunk for session {}: {}",
            session.session_id, content_range
        );

        let response = self
            .client
            .put(self.session_url(&session.session_id))
            .header(CONTENT_TYPE, mime_type_for(&session.source_path))
            .header(CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(UlmanError::from_request)?;

        debug!("Chunk returned {}: {:?}", response.status(), response.headers());
        classify(response.status(), response.headers(), Some(total_size))
    }
}

/// `Content-Range` value for `len` bytes at `start` of a `total` byte file
pub fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}

/// Parse an acknowledged-range header (`bytes=0-42` or `bytes 0-42`)
pub fn parse_range_header(value: &str) -> Result<ByteRange, UlmanError> {
    let malformed = || UlmanError::MalformedRange(value.to_string());

    let rest = value.trim().strip_prefix("bytes").ok_or_else(malformed)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();

    let (start, end) = rest.split_once('-').ok_or_else(malformed)?;
    let start: u64 = start.trim().parse().map_err(|_| malformed())?;
    let end: u64 = end.trim().parse().map_err(|_| malformed())?;

    ByteRange::new(start, end).ok_or_else(malformed)
}

fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    total_size: Option<u64>,
) -> Result<ChunkResult, UlmanError> {
    if status.is_success() {
        return Ok(ChunkResult::Complete {
            status: status.as_u16(),
            total_size,
        });
    }

    if status == RESUME_INCOMPLETE {
        let acknowledged = match headers.get(RANGE) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| UlmanError::MalformedRange(format!("{:?}", value)))?;
                Some(parse_range_header(value)?)
            }
            None => None,
        };
        return Ok(ChunkResult::Incomplete { acknowledged });
    }

    warn!("Unclassified response status {}", status);
    Ok(ChunkResult::Indeterminate {
        status: status.as_u16(),
    })
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(id) = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(id.to_string());
    }

    // The session URI in Location carries the same id
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "upload_id")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|v| !v.is_empty())
}
