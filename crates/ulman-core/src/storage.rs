//! Storage layer for persistent data (settings JSON and the session directory)

use crate::error::UlmanError;
use std::path::PathBuf;
use tokio::fs;
use ulman_types::Settings;

const SETTINGS_FILE: &str = "settings.json";

/// Storage manager for ULMan data
#[derive(Clone, Debug)]
pub struct Storage {
    /// Data directory
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(data_dir: PathBuf) -> Result<Self, UlmanError> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    /// Where session files go unless settings say otherwise
    pub fn default_session_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load settings, falling back to defaults when none were saved yet
    pub async fn load_settings(&self) -> Result<Settings, UlmanError> {
        let path = self.data_dir.join(SETTINGS_FILE);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| {
            UlmanError::Serialization(format!("{}: {}", path.display(), e))
        })
    }

    /// Save settings to storage
    pub async fn save_settings(&self, settings: &Settings) -> Result<(), UlmanError> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| UlmanError::Serialization(e.to_string()))?;

        fs::write(self.data_dir.join(SETTINGS_FILE), content).await?;

        Ok(())
    }
}
