//! ULMan Core - Resumable Upload Engine
//!
//! This crate provides the core upload functionality for ULMan.
//! It opens resumable upload sessions, sends files in chunks, keeps session
//! files on disk and picks interrupted uploads back up where the server left
//! them.

pub mod engine;
mod error;
mod storage;

pub use engine::{
    BroadcastObserver, DriveClient, NoopObserver, ObserverAction, ProgressObserver, SessionStore,
    StaticToken, TokenProvider, TransferManager, UploadProtocol,
};
pub use error::*;
pub use storage::*;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::info;
use ulman_types::{ChunkResult, Settings, StoredSession, TransferEvent, TransferOutcome, TransferRequest};

/// The main ULMan core instance
pub struct UlmanCore {
    /// Application settings
    pub settings: Arc<RwLock<Settings>>,
    /// Settings and data directory
    pub storage: Storage,
    /// Event broadcaster
    event_tx: broadcast::Sender<TransferEvent>,
    /// Set by `cancel`, cleared when the affected transfer returns
    cancelled: Arc<AtomicBool>,
    /// Upload protocol client, rebuilt when settings change
    protocol: Arc<RwLock<Arc<dyn UploadProtocol>>>,
    /// Protocol supplied by the embedder; never rebuilt from settings
    custom_protocol: bool,
}

impl UlmanCore {
    /// Create a new UlmanCore instance talking to the configured endpoint
    pub async fn new(data_dir: PathBuf) -> Result<Self, UlmanError> {
        let storage = Storage::new(data_dir).await?;
        let settings = storage.load_settings().await?;
        let protocol: Arc<dyn UploadProtocol> = Arc::new(DriveClient::new(&settings)?);

        Ok(Self::assemble(storage, settings, protocol, false))
    }

    /// Create a core that uploads through the given protocol client
    pub async fn with_protocol(
        data_dir: PathBuf,
        protocol: Arc<dyn UploadProtocol>,
    ) -> Result<Self, UlmanError> {
        let storage = Storage::new(data_dir).await?;
        let settings = storage.load_settings().await?;

        Ok(Self::assemble(storage, settings, protocol, true))
    }

    fn assemble(
        storage: Storage,
        settings: Settings,
        protocol: Arc<dyn UploadProtocol>,
        custom_protocol: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);

        Self {
            settings: Arc::new(RwLock::new(settings)),
            storage,
            event_tx,
            cancelled: Arc::new(AtomicBool::new(false)),
            protocol: Arc::new(RwLock::new(protocol)),
            custom_protocol,
        }
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    // ========================================================================
    // Upload Operations
    // ========================================================================

    /// Open a new session for `source_path` and upload it as `destination_name`
    pub async fn upload_new(
        &self,
        source_path: &Path,
        destination_name: &str,
        tokens: &dyn TokenProvider,
    ) -> Result<TransferOutcome, UlmanError> {
        let manager = self.manager().await;
        let result = manager
            .submit(source_path, destination_name, None, tokens, self.observer())
            .await;
        self.finish(result)
    }

    /// Resume an existing session identified by its id
    pub async fn resume(
        &self,
        source_path: &Path,
        destination_name: &str,
        session_id: &str,
    ) -> Result<TransferOutcome, UlmanError> {
        let request = TransferRequest::resume(
            source_path.to_path_buf(),
            destination_name.to_string(),
            session_id.to_string(),
        );
        self.run(request).await
    }

    /// Resume the session recorded in a session file
    pub async fn resume_from_file(&self, path: &Path) -> Result<TransferOutcome, UlmanError> {
        let manager = self.manager().await;
        let result = manager.resume_from_file(path, self.observer()).await;
        self.finish(result)
    }

    /// Run a prepared transfer request
    pub async fn run(&self, request: TransferRequest) -> Result<TransferOutcome, UlmanError> {
        let manager = self.manager().await;
        let result = manager.run(request, self.observer()).await;
        self.finish(result)
    }

    /// Ask the server how much of a session it holds
    pub async fn check_status(&self, session_id: &str) -> Result<ChunkResult, UlmanError> {
        self.manager().await.check_status(session_id).await
    }

    /// Stop the running transfer after its current chunk.
    ///
    /// With nothing running, the next transfer stops before sending data.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::Release);
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Saved session files, newest first
    pub async fn list_sessions(&self) -> Result<Vec<StoredSession>, UlmanError> {
        self.session_store().await.list().await
    }

    /// Directory session files are written to
    pub async fn session_dir(&self) -> PathBuf {
        self.session_store().await.dir().to_path_buf()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Get current settings
    pub async fn get_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Update settings
    pub async fn update_settings(&self, settings: Settings) -> Result<(), UlmanError> {
        if settings.chunk_size == 0 {
            return Err(UlmanError::InvalidChunkSize);
        }

        if !self.custom_protocol {
            let client: Arc<dyn UploadProtocol> = Arc::new(DriveClient::new(&settings)?);
            *self.protocol.write().await = client;
        }

        self.storage.save_settings(&settings).await?;
        *self.settings.write().await = settings;
        Ok(())
    }

    async fn session_store(&self) -> SessionStore {
        let dir = self
            .settings
            .read()
            .await
            .session_dir
            .clone()
            .unwrap_or_else(|| self.storage.default_session_dir());
        SessionStore::new(dir)
    }

    async fn manager(&self) -> TransferManager {
        let settings = self.get_settings().await;
        let protocol = self.protocol.read().await.clone();
        TransferManager::new(protocol, self.session_store().await, &settings)
    }

    fn observer(&self) -> Arc<dyn ProgressObserver> {
        Arc::new(BroadcastObserver::new(
            self.event_tx.clone(),
            self.cancelled.clone(),
        ))
    }

    fn finish<T>(&self, result: Result<T, UlmanError>) -> Result<T, UlmanError> {
        self.cancelled.store(false, Ordering::Release);
        result
    }
}

impl Clone for UlmanCore {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            storage: self.storage.clone(),
            event_tx: self.event_tx.clone(),
            cancelled: Arc::clone(&self.cancelled),
            protocol: Arc::clone(&self.protocol),
            custom_protocol: self.custom_protocol,
        }
    }
}
