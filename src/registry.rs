//! Per-file tail state and its reconciliation against discovery results.

use crate::assembler::ReadProgress;
use crate::position::Positions;
use crate::stream::{DEFAULT_MAX_READ_BYTES, LineStream};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tail state shared between the registry and the file's assembler task.
pub type SharedTail = Arc<Mutex<TailState>>;

/// Everything known about one tracked file.
#[derive(Debug)]
pub struct TailState {
    file_id: String,
    full_path: PathBuf,
    start_offset: u64,
    progress: ReadProgress,
    stream: Option<LineStream>,
    assembler_attached: bool,
    closed: bool,
    last_seen: Instant,
}

impl TailState {
    fn new(file_id: String, full_path: PathBuf, start_offset: u64) -> Self {
        Self {
            file_id,
            full_path,
            start_offset,
            progress: ReadProgress::starting_at(start_offset),
            stream: None,
            assembler_attached: false,
            closed: true,
            last_seen: Instant::now(),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.progress.bytes_consumed
    }

    pub fn fragment(&self) -> &str {
        &self.progress.fragment
    }

    pub fn assembler_attached(&self) -> bool {
        self.assembler_attached
    }

    /// True when there is no usable stream and none is being read.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn progress_mut(&mut self) -> &mut ReadProgress {
        &mut self.progress
    }

    /// Hands the stream to an assembler, if one is waiting to be attached.
    pub(crate) fn take_stream(&mut self) -> Option<LineStream> {
        if self.assembler_attached {
            return None;
        }
        let stream = self.stream.take()?;
        self.assembler_attached = true;
        Some(stream)
    }

    /// Called by the assembler when its stream ended; the next reconcile reopens it.
    pub(crate) fn mark_closed(&mut self) {
        self.assembler_attached = false;
        self.stream = None;
        self.closed = true;
    }

    fn install_stream(&mut self, stream: LineStream) {
        self.stream = Some(stream);
        self.closed = false;
    }

    fn needs_stream(&self) -> bool {
        self.closed && !self.assembler_attached
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub discovered: usize,
    pub opened: usize,
    pub reopened: usize,
    pub failed: usize,
}

/// All tracked files, keyed by file name.
#[derive(Debug)]
pub struct TailRegistry {
    watch_dir: PathBuf,
    poll_interval: Duration,
    max_read: usize,
    tails: BTreeMap<String, SharedTail>,
}

impl TailRegistry {
    pub fn new(watch_dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let watch_dir = watch_dir.into();
        let watch_dir = std::path::absolute(&watch_dir).unwrap_or(watch_dir);
        Self {
            watch_dir,
            poll_interval,
            max_read: DEFAULT_MAX_READ_BYTES,
            tails: BTreeMap::new(),
        }
    }

    /// Caps how many bytes a stream buffers for one line.
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read;
        self
    }

    /// Brings the registry in line with the files discovery reported.
    ///
    /// New files get a stream at their persisted offset (or 0); tracked files
    /// whose stream is gone get a new one at `bytes_consumed`. Files missing
    /// from `discovered` are left alone. Open failures leave the state closed
    /// so the next pass retries.
    pub async fn reconcile(
        &mut self,
        discovered: &BTreeSet<String>,
        positions: &Positions,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            discovered: discovered.len(),
            ..ReconcileSummary::default()
        };
        let now = Instant::now();

        for file_id in discovered {
            let tail = match self.tails.get(file_id) {
                Some(tail) => Arc::clone(tail),
                None => {
                    let start_offset = positions.get(file_id).copied().unwrap_or(0);
                    let state = TailState::new(
                        file_id.clone(),
                        self.watch_dir.join(file_id),
                        start_offset,
                    );
                    let tail = Arc::new(Mutex::new(state));
                    self.tails.insert(file_id.clone(), Arc::clone(&tail));

                    let mut state = tail.lock().await;
                    if self.open_stream(&mut state).await {
                        info!(file_id = %file_id, offset = start_offset, "tailing new file");
                        summary.opened += 1;
                    } else {
                        summary.failed += 1;
                    }
                    state.last_seen = now;
                    continue;
                }
            };

            let mut state = tail.lock().await;
            state.last_seen = now;
            if !state.needs_stream() {
                continue;
            }

            if self.open_stream(&mut state).await {
                debug!(
                    file_id = %file_id,
                    offset = state.bytes_consumed(),
                    "reopened tail"
                );
                summary.reopened += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }

    async fn open_stream(&self, state: &mut TailState) -> bool {
        let offset = state.bytes_consumed();
        match LineStream::open_with_max_read(&state.full_path, offset, self.poll_interval, self.max_read)
            .await
        {
            Ok(stream) => {
                state.install_stream(stream);
                true
            }
            Err(e) => {
                warn!(file_id = %state.file_id, offset, error = %e, "cannot open tail; retrying next scan");
                false
            }
        }
    }

    /// Removes closed tails not reported by discovery for longer than `after`.
    pub async fn evict_missing(&mut self, after: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        for (file_id, tail) in &self.tails {
            let state = tail.lock().await;
            if state.needs_stream() && state.last_seen.elapsed() > after {
                evicted.push(file_id.clone());
            }
        }

        for file_id in &evicted {
            self.tails.remove(file_id);
            info!(file_id = %file_id, "evicted tail for missing file");
        }
        evicted
    }

    pub fn get(&self, file_id: &str) -> Option<SharedTail> {
        self.tails.get(file_id).cloned()
    }

    pub fn tails(&self) -> impl Iterator<Item = &SharedTail> {
        self.tails.values()
    }

    pub fn file_ids(&self) -> Vec<String> {
        self.tails.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }
}
