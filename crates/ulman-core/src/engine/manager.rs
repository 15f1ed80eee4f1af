//! Transfer Manager - runs new and resumed uploads
//!
//! This is the coordinator that:
//! - Opens new sessions and persists them before any byte is sent
//! - Resumes existing sessions from a session file or a bare id
//! - Resumes automatically after transport failures, up to a limit

use crate::engine::byte_reader;
use crate::engine::credentials::TokenProvider;
use crate::engine::observer::ProgressObserver;
use crate::engine::protocol::UploadProtocol;
use crate::engine::session_store::SessionStore;
use crate::engine::transfer_task::{StartMode, TaskConfig, TransferTask};
use crate::error::UlmanError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ulman_types::{
    ChunkResult, Credential, Settings, TransferEvent, TransferOutcome, TransferRequest,
    TransferSession,
};

/// Coordinates upload runs against one protocol client and session store
pub struct TransferManager {
    protocol: Arc<dyn UploadProtocol>,
    store: SessionStore,
    config: TaskConfig,
    max_retries: u32,
    retry_delay: Duration,
}

impl TransferManager {
    pub fn new(protocol: Arc<dyn UploadProtocol>, store: SessionStore, settings: &Settings) -> Self {
        Self {
            protocol,
            store,
            config: TaskConfig::from_settings(settings),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_seconds as u64),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Start a new upload, or resume one when a session id is given.
    ///
    /// The token provider is only consulted for new uploads.
    pub async fn submit(
        &self,
        source_path: &Path,
        destination_name: &str,
        session_id: Option<&str>,
        tokens: &dyn TokenProvider,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        let request = match session_id {
            Some(id) => TransferRequest::resume(
                source_path.to_path_buf(),
                destination_name.to_string(),
                id.to_string(),
            ),
            None => TransferRequest::new_upload(
                source_path.to_path_buf(),
                destination_name.to_string(),
                tokens.access_token().await?,
            ),
        };

        self.run(request, observer).await
    }

    /// Run a transfer request to completion
    pub async fn run(
        &self,
        request: TransferRequest,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        match request.credential {
            Credential::Token(token) => {
                self.start_new(&request.source_path, &request.destination_name, &token, observer)
                    .await
            }
            Credential::SessionId(session_id) => {
                let total_size = byte_reader::file_size(&request.source_path).await?;
                let session = TransferSession::new(
                    request.source_path,
                    request.destination_name,
                    session_id,
                    total_size,
                );
                self.resume(session, observer).await
            }
        }
    }

    /// Open a session, save it, then upload from byte 0
    pub async fn start_new(
        &self,
        source_path: &Path,
        destination_name: &str,
        token: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        let total_size = byte_reader::file_size(source_path).await?;
        let session_id = self
            .protocol
            .initiate_session(source_path, destination_name, total_size, token)
            .await?;

        let session = TransferSession::new(
            source_path.to_path_buf(),
            destination_name.to_string(),
            session_id,
            total_size,
        );
        observer.on_event(&TransferEvent::SessionCreated {
            session_id: session.session_id.clone(),
            source_path: session.source_path.clone(),
            destination_name: session.destination_name.clone(),
            total_size,
        });

        // Saved before the first chunk so even a crash right now can be resumed
        let path = self.store.save(&session).await?;
        info!(
            "Keep {} to resume {} if the upload is interrupted",
            path.display(),
            session.session_id
        );
        observer.on_event(&TransferEvent::SessionSaved {
            session_id: session.session_id.clone(),
            path,
        });

        self.run_with_retry(session, StartMode::Fresh, observer).await
    }

    /// Continue an existing session from wherever the server says it stopped
    pub async fn resume(
        &self,
        session: TransferSession,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        self.run_with_retry(session, StartMode::Probe, observer).await
    }

    /// Resume the session recorded in a session file
    pub async fn resume_from_file(
        &self,
        path: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        let session = self.store.load(path).await?;
        self.resume(session, observer).await
    }

    /// Ask the server what it holds for a session, without sending data
    pub async fn check_status(&self, session_id: &str) -> Result<ChunkResult, UlmanError> {
        self.protocol.probe_status(session_id).await
    }

    async fn run_with_retry(
        &self,
        session: TransferSession,
        first_mode: StartMode,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<TransferOutcome, UlmanError> {
        let mut mode = first_mode;
        let mut attempt = 0u32;

        loop {
            let task = TransferTask::new(
                session.clone(),
                self.protocol.clone(),
                observer.clone(),
                self.config,
            )?;

            match task.run(mode).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Upload of {} interrupted: {}. Resuming in {:?} (attempt {}/{})",
                        session.destination_name, e, self.retry_delay, attempt, self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    // Whatever happened, the server knows where we are
                    mode = StartMode::Probe;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::credentials::StaticToken;
    use crate::engine::observer::NoopObserver;
    use crate::engine::test_support::{source_file, Fault, FakeServer, Recorder};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(max_retries: u32) -> Settings {
        Settings {
            chunk_size: 4,
            max_retries,
            retry_delay_seconds: 0,
            ..Settings::default()
        }
    }

    fn manager(server: Arc<FakeServer>, dir: &Path, max_retries: u32) -> TransferManager {
        TransferManager::new(
            server,
            SessionStore::new(dir.join("sessions")),
            &settings(max_retries),
        )
    }

    struct CountingTokens(AtomicU32);

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn access_token(&self) -> Result<String, UlmanError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("ya29.counted".to_string())
        }
    }

    #[tokio::test]
    async fn test_new_upload_saves_session_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "photo.zip", 10).await;
        // First chunk is rejected, so only the saved session remains
        let server = Arc::new(FakeServer::new().fault_at(0, Fault::Status(500)));
        let manager = manager(server.clone(), dir.path(), 0);
        let recorder = Recorder::new();

        let err = manager
            .start_new(&source, "photo.zip", "token", recorder.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, UlmanError::IndeterminateResponse { status: 500 }));

        let saved = manager.store().list().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].session_id, "fake-session-1");
        assert_eq!(saved[0].destination_name, "photo.zip");

        let kinds: Vec<&str> = recorder
            .events()
            .iter()
            .map(|e| match e {
                TransferEvent::SessionCreated { .. } => "created",
                TransferEvent::SessionSaved { .. } => "saved",
                TransferEvent::ResumeProbed { .. } => "probed",
                TransferEvent::Progress { .. } => "progress",
                TransferEvent::StateChanged { .. } => "state",
            })
            .collect();
        assert_eq!(&kinds[..2], &["created", "saved"]);

        // The saved file is enough to finish the job later
        let outcome = manager
            .resume_from_file(&saved[0].path, Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(outcome.session_id, "fake-session-1");
        assert_eq!(server.received(), 10);
        assert_eq!(server.initiations(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_resumes_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::new().fault_at(1, Fault::LostResponse));
        let manager = manager(server.clone(), dir.path(), 2);

        let outcome = manager
            .start_new(&source, "a.bin", "token", Arc::new(NoopObserver))
            .await
            .unwrap();

        assert_eq!(server.probe_calls(), 1);
        assert_eq!(server.chunk_calls(), vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(outcome.chunks_sent, 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::new().fault_at(0, Fault::LostResponse));
        let manager = manager(server.clone(), dir.path(), 0);

        let err = manager
            .start_new(&source, "a.bin", "token", Arc::new(NoopObserver))
            .await
            .unwrap_err();
        assert!(matches!(err, UlmanError::Timeout));
        assert_eq!(server.probe_calls(), 0);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::new().fault_at(0, Fault::Status(403)));
        let manager = manager(server.clone(), dir.path(), 5);

        let err = manager
            .start_new(&source, "a.bin", "token", Arc::new(NoopObserver))
            .await
            .unwrap_err();
        assert!(matches!(err, UlmanError::IndeterminateResponse { status: 403 }));
        assert_eq!(server.chunk_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_never_asks_for_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::with_progress(10, 4));
        let manager = manager(server.clone(), dir.path(), 0);
        let tokens = CountingTokens(AtomicU32::new(0));

        manager
            .submit(&source, "a.bin", Some("existing"), &tokens, Arc::new(NoopObserver))
            .await
            .unwrap();

        assert_eq!(tokens.0.load(Ordering::SeqCst), 0);
        assert_eq!(server.initiations(), 0);
        assert_eq!(server.chunk_calls()[0], (4, 4));
    }

    #[tokio::test]
    async fn test_new_upload_asks_for_a_token_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::new());
        let manager = manager(server.clone(), dir.path(), 0);
        let tokens = CountingTokens(AtomicU32::new(0));

        manager
            .submit(&source, "a.bin", None, &tokens, Arc::new(NoopObserver))
            .await
            .unwrap();

        assert_eq!(tokens.0.load(Ordering::SeqCst), 1);
        assert_eq!(server.initiations(), 1);
        assert_eq!(server.probe_calls(), 0);
    }

    #[tokio::test]
    async fn test_declared_size_is_the_session_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 10).await;
        let server = Arc::new(FakeServer::new());
        let manager = manager(server.clone(), dir.path(), 0);

        let outcome = manager
            .start_new(&source, "a.bin", "token", Arc::new(NoopObserver))
            .await
            .unwrap();

        assert_eq!(server.declared_sizes(), vec![10]);
        assert_eq!(outcome.total_size, 10);
    }

    #[tokio::test]
    async fn test_new_upload_of_missing_source_opens_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(FakeServer::new());
        let manager = manager(server.clone(), dir.path(), 0);

        let err = manager
            .start_new(&dir.path().join("gone.bin"), "gone.bin", "token", Arc::new(NoopObserver))
            .await
            .unwrap_err();

        assert!(matches!(err, UlmanError::Io(_)));
        assert_eq!(server.initiations(), 0);
    }

    #[tokio::test]
    async fn test_run_request_with_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeServer::new()), dir.path(), 0);

        let request = TransferRequest::resume(
            dir.path().join("gone.bin"),
            "gone.bin".to_string(),
            "id".to_string(),
        );
        let err = manager.run(request, Arc::new(NoopObserver)).await.unwrap_err();
        assert!(matches!(err, UlmanError::Io(_)));
    }

    #[tokio::test]
    async fn test_resume_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeServer::new()), dir.path(), 0);

        let err = manager
            .resume_from_file(&dir.path().join("upload_config_x.toml"), Arc::new(NoopObserver))
            .await
            .unwrap_err();
        assert!(matches!(err, UlmanError::ConfigNotFound(_)));
    }

    #[tokio::test]
    async fn test_check_status_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(FakeServer::with_progress(10, 6));
        let manager = manager(server.clone(), dir.path(), 0);

        let first = manager.check_status("s").await.unwrap();
        let second = manager.check_status("s").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.next_offset(), Some(6));
    }

    #[tokio::test]
    async fn test_static_token_through_submit() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "a.bin", 3).await;
        let manager = manager(Arc::new(FakeServer::new()), dir.path(), 0);

        let outcome = manager
            .submit(&source, "a.bin", None, &StaticToken::new("t"), Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(outcome.total_size, 3);
    }
}
