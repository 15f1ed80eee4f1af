//! In-memory resumable upload server for engine tests

use crate::engine::byte_reader;
use crate::engine::protocol::UploadProtocol;
use crate::error::UlmanError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use ulman_types::{ByteRange, ChunkResult, TransferEvent, TransferSession};

use super::observer::{ObserverAction, ProgressObserver};

/// How the server misbehaves on a given chunk call (0-based)
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Store the bytes, then lose the response
    LostResponse,
    /// Reject with an unclassified status
    Status(u16),
    /// Ignore the bytes and repeat the current range
    Ignore,
}

#[derive(Debug, Default)]
struct FakeState {
    total_size: Option<u64>,
    received: u64,
    chunk_calls: Vec<(u64, u64)>,
    probe_calls: u32,
    initiations: u32,
    declared_sizes: Vec<u64>,
    faults: HashMap<usize, Fault>,
}

/// Accepts contiguous chunks and answers like the real service
#[derive(Debug, Default)]
pub struct FakeServer {
    state: Mutex<FakeState>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that already holds `received` bytes of a `total_size` file
    pub fn with_progress(total_size: u64, received: u64) -> Self {
        let server = Self::new();
        {
            let mut state = server.state.lock().unwrap();
            state.total_size = Some(total_size);
            state.received = received;
        }
        server
    }

    pub fn fault_at(self, call: usize, fault: Fault) -> Self {
        self.state.lock().unwrap().faults.insert(call, fault);
        self
    }

    /// `(start, len)` of every chunk request so far
    pub fn chunk_calls(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().chunk_calls.clone()
    }

    pub fn probe_calls(&self) -> u32 {
        self.state.lock().unwrap().probe_calls
    }

    pub fn initiations(&self) -> u32 {
        self.state.lock().unwrap().initiations
    }

    /// Sizes announced when sessions were opened
    pub fn declared_sizes(&self) -> Vec<u64> {
        self.state.lock().unwrap().declared_sizes.clone()
    }

    pub fn received(&self) -> u64 {
        self.state.lock().unwrap().received
    }

    fn current(state: &FakeState) -> ChunkResult {
        match state.total_size {
            Some(total) if state.received == total => ChunkResult::Complete {
                status: 200,
                total_size: Some(total),
            },
            _ => ChunkResult::Incomplete {
                acknowledged: if state.received == 0 {
                    None
                } else {
                    ByteRange::new(0, state.received - 1)
                },
            },
        }
    }
}

#[async_trait]
impl UploadProtocol for FakeServer {
    async fn initiate_session(
        &self,
        _source_path: &Path,
        _destination_name: &str,
        total_size: u64,
        _token: &str,
    ) -> Result<String, UlmanError> {
        let mut state = self.state.lock().unwrap();
        state.initiations += 1;
        state.declared_sizes.push(total_size);
        state.total_size = Some(total_size);
        state.received = 0;
        Ok(format!("fake-session-{}", state.initiations))
    }

    async fn probe_status(&self, _session_id: &str) -> Result<ChunkResult, UlmanError> {
        let mut state = self.state.lock().unwrap();
        state.probe_calls += 1;
        Ok(match Self::current(&state) {
            ChunkResult::Complete { status, .. } => ChunkResult::Complete {
                status,
                total_size: None,
            },
            other => other,
        })
    }

    async fn upload_chunk(
        &self,
        session: &TransferSession,
        start_byte: u64,
        chunk_size: u64,
    ) -> Result<ChunkResult, UlmanError> {
        let expected = chunk_size.min(session.total_size.saturating_sub(start_byte));
        let data = byte_reader::read_range(&session.source_path, start_byte, expected).await?;
        let len = data.len() as u64;

        let mut state = self.state.lock().unwrap();
        let call = state.chunk_calls.len();
        state.chunk_calls.push((start_byte, len));
        state.total_size = Some(session.total_size);

        let fault = state.faults.get(&call).copied();
        match fault {
            Some(Fault::Status(status)) => return Ok(ChunkResult::Indeterminate { status }),
            Some(Fault::Ignore) => return Ok(Self::current(&state)),
            _ => {}
        }

        if start_byte == state.received {
            state.received += len;
        }

        match fault {
            Some(Fault::LostResponse) => Err(UlmanError::Timeout),
            _ => Ok(Self::current(&state)),
        }
    }
}

/// Observer that records every event and optionally cancels after the
/// `n`-th progress event
pub struct Recorder {
    events: Mutex<Vec<TransferEvent>>,
    cancel_after_progress: Option<usize>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            cancel_after_progress: None,
        })
    }

    pub fn cancelling_after(progress_events: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            cancel_after_progress: Some(progress_events),
        })
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<f64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { progress, .. } => Some(progress.percent),
                _ => None,
            })
            .collect()
    }
}

impl ProgressObserver for Recorder {
    fn on_event(&self, event: &TransferEvent) -> ObserverAction {
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());

        let progress_seen = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Progress { .. }))
            .count();
        match self.cancel_after_progress {
            Some(limit) if progress_seen >= limit => ObserverAction::Cancel,
            _ => ObserverAction::Continue,
        }
    }
}

/// Write a file of `len` patterned bytes into `dir`
pub async fn source_file(dir: &Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    tokio::fs::write(&path, data).await.unwrap();
    path
}
