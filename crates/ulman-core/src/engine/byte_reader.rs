//! Byte range reads from the source file

use crate::error::UlmanError;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read up to `max_bytes` starting at `start_byte`.
///
/// The result is shorter than `max_bytes` only when end of file is reached.
pub async fn read_range(path: &Path, start_byte: u64, max_bytes: u64) -> Result<Vec<u8>, UlmanError> {
    let mut file = File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(start_byte)).await?;

    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024 * 1024) as usize);
    file.take(max_bytes).read_to_end(&mut buf).await?;

    Ok(buf)
}

/// Current size of the file in bytes
pub async fn file_size(path: &Path) -> Result<u64, UlmanError> {
    Ok(tokio::fs::metadata(path).await?.len())
}
