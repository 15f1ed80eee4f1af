//! Upload Engine - resumable chunked transfers
//!
//! This module implements the resumable upload flow:
//! - Session initiation and crash-safe session files
//! - Sequential fixed-size chunks with server-driven offsets
//! - Status probes to resume after any interruption
//! - Progress events and cooperative cancellation

mod byte_reader;
mod credentials;
mod manager;
mod observer;
mod protocol;
mod session_store;
mod transfer_task;

#[cfg(test)]
pub(crate) mod test_support;

pub use byte_reader::*;
pub use credentials::*;
pub use manager::*;
pub use observer::*;
pub use protocol::*;
pub use session_store::*;
pub use transfer_task::*;
