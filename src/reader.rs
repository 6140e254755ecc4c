//! File reading utilities for tailing: raw line splitting and change detection.

use crate::error::{Error, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

/// One line read from a tailed file, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line text, lossily decoded.
    pub text: String,
    /// Bytes the line occupied on disk, terminator excluded.
    pub byte_len: u64,
    /// Whether a `\n` followed the line. False only for a partial line at end of file.
    pub terminated: bool,
}

impl RawLine {
    /// Builds a line from the bytes returned by a `read_until(b'\n')`.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let terminated = bytes.last() == Some(&b'\n');
        if terminated {
            bytes.pop();
        }
        let byte_len = bytes.len() as u64;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Self {
            text,
            byte_len,
            terminated,
        }
    }

    /// Bytes of the file this line accounts for, terminator included.
    pub fn consumed_bytes(&self) -> u64 {
        self.byte_len + u64::from(self.terminated)
    }
}

/// Outcome of draining the bytes currently available in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Reached end of file; `lines` were delivered.
    Eof { lines: usize },
    /// The receiving side is gone.
    ReceiverClosed,
}

/// Reads every line currently available and sends it through the channel,
/// advancing `position` by the bytes each delivered line consumed.
///
/// A trailing partial line is delivered unterminated; the next call picks up
/// right after it. No single read buffers more than `max_read` bytes: a longer
/// line arrives as several unterminated pieces.
pub(crate) async fn read_available_lines(
    reader: &mut BufReader<File>,
    position: &mut u64,
    max_read: usize,
    tx: &mpsc::Sender<Result<RawLine>>,
) -> Result<ReadOutcome> {
    let limit = max_read.max(1) as u64;
    let mut lines = 0;
    loop {
        let mut buf = Vec::new();
        let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok(ReadOutcome::Eof { lines });
        }

        let line = RawLine::from_bytes(buf);
        *position += line.consumed_bytes();
        lines += 1;

        if tx.send(Ok(line)).await.is_err() {
            return Ok(ReadOutcome::ReceiverClosed);
        }
    }
}

/// Checks whether the file at `path` is still the one behind `file` and has
/// not shrunk below `position`. Returns its current size.
pub(crate) async fn check_source(path: &Path, file: &File, position: u64) -> Result<u64> {
    let on_disk = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::stream(path, format!("file no longer accessible: {e}")))?;

    if detect_file_truncation(on_disk.len(), position) {
        return Err(Error::Truncated {
            path: path.to_path_buf(),
            size: on_disk.len(),
            offset: position,
        });
    }

    let opened = file.metadata().await?;
    if is_replaced(&opened, &on_disk) {
        return Err(Error::stream(path, "file was replaced"));
    }

    Ok(on_disk.len())
}

/// Detect if the file was truncated by comparing current size with last position
pub(crate) fn detect_file_truncation(current_size: u64, last_position: u64) -> bool {
    current_size < last_position
}

/// Calculate bytes to read based on current size and last position
pub(crate) fn calculate_bytes_to_read(current_size: u64, last_position: u64) -> Option<u64> {
    if current_size <= last_position {
        None
    } else {
        Some(current_size - last_position)
    }
}

#[cfg(unix)]
fn is_replaced(opened: &std::fs::Metadata, on_disk: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    opened.dev() != on_disk.dev() || opened.ino() != on_disk.ino()
}

#[cfg(not(unix))]
fn is_replaced(_opened: &std::fs::Metadata, _on_disk: &std::fs::Metadata) -> bool {
    false
}
