//! Session file persistence
//!
//! Each new upload session is written to its own small TOML file as soon as
//! the server hands out a session id, so an upload that crashes before its
//! first chunk can still be resumed. Offsets are never written here; they
//! are rediscovered from the server on resume.

use crate::engine::byte_reader;
use crate::error::UlmanError;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use ulman_types::{StoredSession, TransferSession};

const FILE_PREFIX: &str = "upload_config_";
const FILE_EXTENSION: &str = "toml";

/// On-disk layout of a session file
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    pathfilename: PathBuf,
    filename: String,
    upload_id: String,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn validate(&self) -> Result<(), String> {
        if self.pathfilename.as_os_str().is_empty() {
            return Err("pathfilename is empty".to_string());
        }
        if self.filename.trim().is_empty() {
            return Err("filename is empty".to_string());
        }
        if self.upload_id.trim().is_empty() {
            return Err("upload_id is empty".to_string());
        }
        Ok(())
    }
}

/// Directory of session files, one per upload
#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the session triple and return the path of the new file
    pub async fn save(&self, session: &TransferSession) -> Result<PathBuf, UlmanError> {
        fs::create_dir_all(&self.dir).await?;

        let record = SessionRecord {
            pathfilename: session.source_path.clone(),
            filename: session.destination_name.clone(),
            upload_id: session.session_id.clone(),
            saved_at: Some(Utc::now()),
        };
        let content =
            toml::to_string(&record).map_err(|e| UlmanError::Serialization(e.to_string()))?;

        let stem = format!(
            "{}{}",
            FILE_PREFIX,
            Local::now().format("%Y_%m_%d_%Hh%Mm%Ss")
        );

        // Two sessions created within the same second get a numeric suffix
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}", stem, FILE_EXTENSION)
            } else {
                format!("{}_{}.{}", stem, attempt, FILE_EXTENSION)
            };
            let path = self.dir.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    file.sync_all().await?;
                    info!("Saved session {} to {}", session.session_id, path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read a session file back and size its source file
    pub async fn load(&self, path: &Path) -> Result<TransferSession, UlmanError> {
        let record = read_record(path).await?;

        info!("Loaded session file {}", path.display());
        debug!("  source: {}", record.pathfilename.display());
        debug!("  destination: {}", record.filename);
        debug!("  session id: {}", record.upload_id);

        let total_size = byte_reader::file_size(&record.pathfilename).await?;
        Ok(TransferSession::new(
            record.pathfilename,
            record.filename,
            record.upload_id,
            total_size,
        ))
    }

    /// All readable session files in the directory, newest first
    pub async fn list(&self) -> Result<Vec<StoredSession>, UlmanError> {
        let mut sessions = Vec::new();

        if !self.dir.exists() {
            return Ok(sessions);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_session_file(&path) {
                continue;
            }
            match read_record(&path).await {
                Ok(record) => sessions.push(StoredSession {
                    path,
                    source_path: record.pathfilename,
                    destination_name: record.filename,
                    session_id: record.upload_id,
                    saved_at: record.saved_at,
                }),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        sessions.sort_by(|a, b| b.saved_at.cmp(&a.saved_at).then_with(|| b.path.cmp(&a.path)));
        Ok(sessions)
    }
}

fn is_session_file(path: &Path) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(FILE_PREFIX))
        .unwrap_or(false);
    has_prefix && path.extension().map(|e| e == FILE_EXTENSION).unwrap_or(false)
}

async fn read_record(path: &Path) -> Result<SessionRecord, UlmanError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(UlmanError::ConfigNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let record: SessionRecord = toml::from_str(&content).map_err(|e| UlmanError::ConfigMalformed {
        path: path.to_path_buf(),
        reason: e.message().to_string(),
    })?;

    record.validate().map_err(|reason| UlmanError::ConfigMalformed {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(record)
}
