//! Shared types for ULMan
//!
//! This crate contains the plain data structures shared between
//! the core upload engine and the CLI front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default size of each chunk sent in a resumable upload (4 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default resumable upload endpoint
pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";

// ============================================================================
// Transfer Types
// ============================================================================

/// One logical file transfer, identified by the remote session id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSession {
    pub source_path: PathBuf,
    pub destination_name: String,
    pub session_id: String,
    /// Size of the source file when the transfer was (re)started
    pub total_size: u64,
    /// First byte not yet acknowledged by the remote service
    pub next_byte_offset: u64,
}

impl TransferSession {
    pub fn new(
        source_path: PathBuf,
        destination_name: String,
        session_id: String,
        total_size: u64,
    ) -> Self {
        Self {
            source_path,
            destination_name,
            session_id,
            total_size,
            next_byte_offset: 0,
        }
    }

    /// Bytes still to be sent
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.next_byte_offset)
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress::new(self.next_byte_offset, self.total_size)
    }
}

/// Inclusive byte range acknowledged by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Returns `None` when `start > end`
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of bytes covered by the range
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// First byte after the range
    pub fn next_offset(&self) -> u64 {
        self.end + 1
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Classified outcome of a probe or chunk upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ChunkResult {
    /// The remote holds the whole file; a status probe does not learn its size
    Complete { status: u16, total_size: Option<u64> },
    /// More bytes are expected; `None` means nothing acknowledged yet
    Incomplete { acknowledged: Option<ByteRange> },
    /// Any other response; never counts as progress
    Indeterminate { status: u16 },
}

impl ChunkResult {
    /// Offset the next chunk must start at, if the response allows continuing
    pub fn next_offset(&self) -> Option<u64> {
        match self {
            ChunkResult::Incomplete { acknowledged } => {
                Some(acknowledged.map(|r| r.next_offset()).unwrap_or(0))
            }
            _ => None,
        }
    }
}

/// State of a transfer as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    NotStarted,
    SessionEstablished,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

/// Acknowledged bytes against the total size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub acknowledged_bytes: u64,
    pub total_size: u64,
    pub percent: f64,
}

impl TransferProgress {
    pub fn new(acknowledged_bytes: u64, total_size: u64) -> Self {
        let percent = if total_size == 0 {
            100.0
        } else {
            acknowledged_bytes as f64 * 100.0 / total_size as f64
        };
        Self {
            acknowledged_bytes,
            total_size,
            percent,
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// How the transfer is authorized: a fresh token starts a new session,
/// a session id resumes an existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Token(String),
    SessionId(String),
}

/// Everything a front end hands to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_path: PathBuf,
    pub destination_name: String,
    pub credential: Credential,
}

impl TransferRequest {
    pub fn new_upload(source_path: PathBuf, destination_name: String, token: String) -> Self {
        Self {
            source_path,
            destination_name,
            credential: Credential::Token(token),
        }
    }

    pub fn resume(source_path: PathBuf, destination_name: String, session_id: String) -> Self {
        Self {
            source_path,
            destination_name,
            credential: Credential::SessionId(session_id),
        }
    }
}

/// Final report of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub session_id: String,
    pub destination_name: String,
    pub total_size: u64,
    /// Number of chunk requests issued during this run
    pub chunks_sent: u32,
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} uploaded ({} bytes, {} chunk(s) this run)",
            self.destination_name, self.total_size, self.chunks_sent
        )
    }
}

/// A session file found on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub path: PathBuf,
    pub source_path: PathBuf,
    pub destination_name: String,
    pub session_id: String,
    pub saved_at: Option<DateTime<Utc>>,
}

// ============================================================================
// MIME Types
// ============================================================================

/// Declared MIME type of a file, derived from its name suffix only
pub fn mime_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("zip") => "application/zip",
        Some("img") => "application/x-raw-disk-image",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the resumable upload endpoint
    pub endpoint: String,
    /// Bytes sent per chunk request
    pub chunk_size: u64,
    /// Where session files are written (None = `<data dir>/sessions`)
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Maximum number of automatic resumes after a transport failure
    pub max_retries: u32,
    /// Delay in seconds between retry attempts
    pub retry_delay_seconds: u32,
    /// Consecutive chunk responses without progress before giving up
    #[serde(default = "default_max_stalled_chunks")]
    pub max_stalled_chunks: u32,
    #[serde(default)]
    pub verbose: bool,
}

fn default_max_stalled_chunks() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_dir: None,
            connect_timeout_secs: 30,
            request_timeout_secs: 120,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_stalled_chunks: default_max_stalled_chunks(),
            verbose: false,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core to front ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    SessionCreated {
        session_id: String,
        source_path: PathBuf,
        destination_name: String,
        total_size: u64,
    },
    SessionSaved {
        session_id: String,
        path: PathBuf,
    },
    ResumeProbed {
        session_id: String,
        result: ChunkResult,
        next_offset: u64,
    },
    Progress {
        session_id: String,
        progress: TransferProgress,
    },
    StateChanged {
        session_id: String,
        state: TransferState,
        error: Option<String>,
    },
}
