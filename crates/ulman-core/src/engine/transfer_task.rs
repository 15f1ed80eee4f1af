//! Transfer task - drives one upload session to completion
//!
//! The server's acknowledged range is the only source of truth for the next
//! offset, so chunks are strictly sequential: each request finishes and is
//! classified before the next one is built.

use crate::engine::observer::{ObserverAction, ProgressObserver};
use crate::engine::protocol::UploadProtocol;
use crate::error::UlmanError;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use ulman_types::{ChunkResult, TransferEvent, TransferOutcome, TransferSession, TransferState};

/// Where the first chunk of a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Session was just created: nothing has been sent, start at 0
    Fresh,
    /// Existing session: ask the server where to continue
    Probe,
}

/// Engine knobs taken from settings
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    pub chunk_size: u64,
    pub max_stalled_chunks: u32,
}

impl TaskConfig {
    pub fn from_settings(settings: &ulman_types::Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            max_stalled_chunks: settings.max_stalled_chunks,
        }
    }
}

/// A single run of the resumable upload state machine
pub struct TransferTask {
    session: TransferSession,
    protocol: Arc<dyn UploadProtocol>,
    observer: Arc<dyn ProgressObserver>,
    config: TaskConfig,
    state: TransferState,
    chunks_sent: u32,
}

impl TransferTask {
    /// Create a new transfer task
    pub fn new(
        session: TransferSession,
        protocol: Arc<dyn UploadProtocol>,
        observer: Arc<dyn ProgressObserver>,
        config: TaskConfig,
    ) -> Result<Self, UlmanError> {
        if config.chunk_size == 0 {
            return Err(UlmanError::InvalidChunkSize);
        }

        Ok(Self {
            session,
            protocol,
            observer,
            config,
            state: TransferState::NotStarted,
            chunks_sent: 0,
        })
    }

    /// Run the task until the server reports completion or a run-ending error
    pub async fn run(mut self, mode: StartMode) -> Result<TransferOutcome, UlmanError> {
        info!(
            "Starting transfer of {} as {} (session {}, {} bytes, {:?})",
            self.session.source_path.display(),
            self.session.destination_name,
            self.session.session_id,
            self.session.total_size,
            mode
        );

        match self.drive(mode).await {
            Ok(()) => {
                self.enter(TransferState::Completed, None);
                info!(
                    "Transfer complete: {} ({} chunk(s) this run)",
                    self.session.destination_name, self.chunks_sent
                );
                Ok(TransferOutcome {
                    session_id: self.session.session_id,
                    destination_name: self.session.destination_name,
                    total_size: self.session.total_size,
                    chunks_sent: self.chunks_sent,
                })
            }
            Err(UlmanError::Cancelled) => {
                info!(
                    "Transfer {} cancelled at byte {}",
                    self.session.session_id, self.session.next_byte_offset
                );
                self.enter(TransferState::Cancelled, None);
                Err(UlmanError::Cancelled)
            }
            Err(e) => {
                error!("Transfer {} failed: {}", self.session.session_id, e);
                self.enter(TransferState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&mut self, mode: StartMode) -> Result<(), UlmanError> {
        self.advance(TransferState::SessionEstablished)?;

        match mode {
            StartMode::Fresh => {
                self.session.next_byte_offset = 0;
            }
            StartMode::Probe => {
                let result = self.protocol.probe_status(&self.session.session_id).await?;
                debug!("Probe for {}: {:?}", self.session.session_id, result);

                let next_offset = match result {
                    ChunkResult::Complete { .. } => self.session.total_size,
                    ChunkResult::Incomplete { .. } => result.next_offset().unwrap_or(0),
                    ChunkResult::Indeterminate { status } => {
                        return Err(UlmanError::IndeterminateResponse { status });
                    }
                };
                self.check_within_file(next_offset, &result)?;

                self.emit(TransferEvent::ResumeProbed {
                    session_id: self.session.session_id.clone(),
                    result,
                    next_offset,
                });
                self.session.next_byte_offset = next_offset;

                if matches!(result, ChunkResult::Complete { .. }) {
                    info!("Server already holds the whole file");
                    return self.report_progress();
                }
                info!(
                    "Resuming {} at byte {} ({} bytes left)",
                    self.session.session_id,
                    next_offset,
                    self.session.remaining()
                );
            }
        }

        self.advance(TransferState::Transferring)?;
        self.transfer_chunks().await
    }

    async fn transfer_chunks(&mut self) -> Result<(), UlmanError> {
        let mut stalled = 0u32;

        loop {
            let offset = self.session.next_byte_offset;
            let expected_len = self
                .config
                .chunk_size
                .min(self.session.total_size.saturating_sub(offset));
            let result = self
                .protocol
                .upload_chunk(&self.session, offset, self.config.chunk_size)
                .await?;
            self.chunks_sent += 1;

            match result {
                ChunkResult::Complete { status, .. } => {
                    // Only the chunk ending at the last byte can finish the file
                    if offset + expected_len != self.session.total_size {
                        warn!(
                            "Server reported completion after bytes {}..{} of {}",
                            offset,
                            offset + expected_len,
                            self.session.total_size
                        );
                        return Err(UlmanError::IndeterminateResponse { status });
                    }
                    self.session.next_byte_offset = self.session.total_size;
                    return self.report_progress();
                }
                ChunkResult::Incomplete { .. } => {
                    let next_offset = result.next_offset().unwrap_or(0);
                    self.check_within_file(next_offset, &result)?;

                    if next_offset <= offset {
                        stalled += 1;
                        warn!(
                            "Chunk at {} not acknowledged (server has up to {}), {} in a row",
                            offset, next_offset, stalled
                        );
                        if stalled >= self.config.max_stalled_chunks.max(1) {
                            return Err(UlmanError::Stalled { offset });
                        }
                    } else {
                        stalled = 0;
                    }

                    self.session.next_byte_offset = next_offset;
                    self.report_progress()?;
                }
                ChunkResult::Indeterminate { status } => {
                    return Err(UlmanError::IndeterminateResponse { status });
                }
            }
        }
    }

    /// A server claiming bytes past the end of the file is not following the protocol
    fn check_within_file(&self, next_offset: u64, result: &ChunkResult) -> Result<(), UlmanError> {
        if next_offset > self.session.total_size {
            warn!(
                "Server acknowledged {} bytes of a {} byte file: {:?}",
                next_offset, self.session.total_size, result
            );
            return Err(UlmanError::IndeterminateResponse {
                status: crate::engine::protocol::RESUME_INCOMPLETE.as_u16(),
            });
        }
        Ok(())
    }

    fn report_progress(&mut self) -> Result<(), UlmanError> {
        let progress = self.session.progress();
        info!(
            "{}: {}/{} bytes ({:.1}%)",
            self.session.destination_name,
            progress.acknowledged_bytes,
            progress.total_size,
            progress.percent
        );

        let action = self.emit(TransferEvent::Progress {
            session_id: self.session.session_id.clone(),
            progress,
        });
        let finished = self.session.next_byte_offset == self.session.total_size;
        if action == ObserverAction::Cancel && !finished {
            return Err(UlmanError::Cancelled);
        }
        Ok(())
    }

    /// Move to a non-terminal state; the observer may cancel here
    fn advance(&mut self, state: TransferState) -> Result<(), UlmanError> {
        if self.enter(state, None) == ObserverAction::Cancel {
            return Err(UlmanError::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self, state: TransferState, error: Option<String>) -> ObserverAction {
        debug!("Session {}: {:?} -> {:?}", self.session.session_id, self.state, state);
        self.state = state;
        self.emit(TransferEvent::StateChanged {
            session_id: self.session.session_id.clone(),
            state,
            error,
        })
    }

    fn emit(&self, event: TransferEvent) -> ObserverAction {
        self.observer.on_event(&event)
    }
}
