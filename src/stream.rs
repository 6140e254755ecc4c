//! Stream of raw lines following a single file by polling.

use crate::error::{Error, Result};
use crate::reader::{RawLine, ReadOutcome, calculate_bytes_to_read, check_source, read_available_lines};
use futures::Stream;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lines buffered between the follower and its consumer.
const LINE_BUFFER: usize = 1024;

/// Largest single read used by [`LineStream::open`].
pub const DEFAULT_MAX_READ_BYTES: usize = crate::config::DEFAULT_MAX_FRAGMENT_BYTES + 1;

/// A stream of the lines appended to a file, starting at a given offset.
///
/// A background task reads everything available, then re-checks the file
/// every poll interval. The stream yields an error and ends when the file is
/// removed, replaced or truncated below the read position; the owner is
/// expected to open a fresh stream later.
pub struct LineStream {
    receiver: mpsc::Receiver<Result<RawLine>>,
    path: PathBuf,
    start_offset: u64,
    _shutdown_tx: broadcast::Sender<()>,
    _task_handle: JoinHandle<()>,
}

impl LineStream {
    /// Opens `path` at `offset` and starts following it.
    pub async fn open<P: AsRef<Path>>(path: P, offset: u64, poll_interval: Duration) -> Result<Self> {
        Self::open_with_max_read(path, offset, poll_interval, DEFAULT_MAX_READ_BYTES).await
    }

    /// Like [`open`](Self::open), but lines longer than `max_read` bytes are
    /// yielded as several unterminated pieces.
    pub async fn open_with_max_read<P: AsRef<Path>>(
        path: P,
        offset: u64,
        poll_interval: Duration,
        max_read: usize,
    ) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();

        let mut file = File::open(&file_path)
            .await
            .map_err(|e| Error::stream(&file_path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::stream(&file_path, e))?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task_path = file_path.clone();
        let task_handle = tokio::spawn(async move {
            let task_tx = tx.clone();
            if let Err(e) =
                follow_file(task_path, file, offset, poll_interval, max_read, tx, shutdown_rx).await
            {
                let _ = task_tx.send(Err(e)).await;
            }
        });

        Ok(LineStream {
            receiver: rx,
            path: file_path,
            start_offset: offset,
            _shutdown_tx: shutdown_tx,
            _task_handle: task_handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the stream was opened at.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        let _ = self._shutdown_tx.send(());
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("path", &self.path)
            .field("start_offset", &self.start_offset)
            .finish_non_exhaustive()
    }
}

/// Background task reading `file` from `offset` until shutdown or failure.
async fn follow_file(
    file_path: PathBuf,
    file: File,
    offset: u64,
    poll_interval: Duration,
    max_read: usize,
    tx: mpsc::Sender<Result<RawLine>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let mut reader = BufReader::new(file);
    let mut position = offset;

    loop {
        match read_available_lines(&mut reader, &mut position, max_read, &tx).await? {
            ReadOutcome::ReceiverClosed => return Ok(()),
            ReadOutcome::Eof { lines } if lines > 0 => {
                debug!(path = %file_path.display(), lines, position, "read appended lines");
            }
            ReadOutcome::Eof { .. } => {}
        }

        // Wait until the file grows past the read position.
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                _ = tokio::time::sleep(poll_interval) => {}
            }

            if tx.is_closed() {
                return Ok(());
            }

            let size = check_source(&file_path, reader.get_ref(), position).await?;
            if calculate_bytes_to_read(size, position).is_some() {
                break;
            }
        }
    }
}

impl Stream for LineStream {
    type Item = Result<RawLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}
