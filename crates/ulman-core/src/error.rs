//! Error types for ULMan core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in ULMan core
#[derive(Debug, Error)]
pub enum UlmanError {
    #[error("Session initiation rejected by the server (status {status})")]
    SessionInitiation { status: u16 },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Unexpected response from the server (status {status})")]
    IndeterminateResponse { status: u16 },

    #[error("Malformed acknowledged range: {0:?}")]
    MalformedRange(String),

    #[error("Server stopped acknowledging new bytes at offset {offset}")]
    Stalled { offset: u64 },

    #[error("Session file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Session file {} is malformed: {reason}", .path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk size must be a positive number of bytes")]
    InvalidChunkSize,

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl UlmanError {
    /// Build a transport error, folding reqwest timeouts into `Timeout`
    pub fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            UlmanError::Timeout
        } else {
            UlmanError::Transport(error)
        }
    }

    /// Check if resuming the same session may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, UlmanError::Transport(_) | UlmanError::Timeout)
    }

    /// Short, stable label naming the error class
    pub fn kind(&self) -> &'static str {
        match self {
            UlmanError::SessionInitiation { .. } => "session-initiation",
            UlmanError::Transport(_) | UlmanError::Timeout => "transport",
            UlmanError::IndeterminateResponse { .. }
            | UlmanError::MalformedRange(_)
            | UlmanError::Stalled { .. } => "indeterminate-response",
            UlmanError::ConfigNotFound(_) => "config-not-found",
            UlmanError::ConfigMalformed { .. } => "config-malformed",
            UlmanError::Io(_) => "io",
            UlmanError::InvalidChunkSize | UlmanError::InvalidOperation(_) => "invalid-input",
            UlmanError::Cancelled => "cancelled",
            UlmanError::Serialization(_) => "serialization",
        }
    }
}
