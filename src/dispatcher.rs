//! Periodic scanning and per-file dispatch of assembled entries.

use crate::assembler::RecordAssembler;
use crate::config::AgentConfig;
use crate::discovery;
use crate::error::Result;
use crate::pipeline::{Entry, ExecutionContext, Pipeline};
use crate::position::{PositionBook, PositionStore, Positions};
use crate::registry::{SharedTail, TailRegistry};
use crate::stream::LineStream;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub discovered: usize,
    /// Streams opened or reopened.
    pub opened: usize,
    /// Files whose stream could not be opened this scan.
    pub failed: usize,
    /// Assembler tasks started.
    pub attached: usize,
    pub evicted: usize,
}

/// Point-in-time view of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailSnapshot {
    pub file_id: String,
    pub start_offset: u64,
    pub bytes_consumed: u64,
    pub fragment: String,
    pub closed: bool,
    pub assembler_attached: bool,
}

/// State shared by the scan timer and every assembler task.
struct DispatchContext {
    config: AgentConfig,
    pipeline: Arc<dyn Pipeline>,
    positions: PositionBook,
    registry: Mutex<TailRegistry>,
    /// Name of the position file when it lives inside the watched directory.
    excluded: Option<String>,
    /// Resolves once the owning [`Dispatcher`] is dropped.
    halt_rx: watch::Receiver<()>,
}

/// Discovers files on an interval and feeds their entries to a pipeline.
///
/// [`Dispatcher::stop`] only cancels the scan timer; open streams keep
/// delivering entries. Dropping the dispatcher ends every assembler task and,
/// with them, the file followers.
pub struct Dispatcher {
    context: Arc<DispatchContext>,
    shutdown_tx: broadcast::Sender<()>,
    _halt_tx: watch::Sender<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Validates `config` and loads the persisted positions.
    pub async fn new(config: AgentConfig, pipeline: Arc<dyn Pipeline>) -> Result<Self> {
        config.validate()?;

        let positions = PositionBook::open(PositionStore::new(&config.position_file)).await;
        let registry = TailRegistry::new(&config.watch_dir, config.read_poll_interval())
            .with_max_read(config.max_fragment_bytes.saturating_add(1));
        let excluded = excluded_name(&config.watch_dir, &config.position_file);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (halt_tx, halt_rx) = watch::channel(());

        Ok(Self {
            context: Arc::new(DispatchContext {
                config,
                pipeline,
                positions,
                registry: Mutex::new(registry),
                excluded,
                halt_rx,
            }),
            shutdown_tx,
            _halt_tx: halt_tx,
            timer: Mutex::new(None),
        })
    }

    /// Runs a scan right away, then keeps scanning every scan interval.
    ///
    /// A second call while the timer is running does nothing and returns an
    /// empty summary.
    pub async fn start(&self) -> ScanSummary {
        let mut timer = self.timer.lock().await;
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("dispatcher already started");
            return ScanSummary::default();
        }

        let summary = self.context.refresh().await;
        info!(
            watch_dir = %self.context.config.watch_dir.display(),
            discovered = summary.discovered,
            "dispatcher started"
        );

        let context = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = context.config.scan_interval();
        *timer = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        context.refresh().await;
                    }
                }
            }
            debug!("scan timer stopped");
        }));

        summary
    }

    /// Runs one scan now, independent of the timer.
    pub async fn refresh(&self) -> ScanSummary {
        self.context.refresh().await
    }

    /// Cancels the pending scan. Without a prior `start` this does nothing.
    pub async fn stop(&self) {
        let Some(handle) = self.timer.lock().await.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            warn!(error = %e, "scan timer ended abnormally");
        }
        info!("dispatcher stopped");
    }

    /// Whether a scan is scheduled.
    pub async fn has_pending_scan(&self) -> bool {
        self.timer
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The offsets persisted so far.
    pub async fn positions(&self) -> Positions {
        self.context.positions.snapshot().await
    }

    pub async fn tracked_files(&self) -> Vec<String> {
        self.context.registry.lock().await.file_ids()
    }

    pub async fn tail_snapshot(&self, file_id: &str) -> Option<TailSnapshot> {
        let tail = self.context.registry.lock().await.get(file_id)?;
        let state = tail.lock().await;
        Some(TailSnapshot {
            file_id: state.file_id().to_string(),
            start_offset: state.start_offset(),
            bytes_consumed: state.bytes_consumed(),
            fragment: state.fragment().to_string(),
            closed: state.is_closed(),
            assembler_attached: state.assembler_attached(),
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.context.config)
            .finish_non_exhaustive()
    }
}

impl DispatchContext {
    async fn refresh(self: &Arc<Self>) -> ScanSummary {
        let mut discovered = match discovery::list(&self.config.watch_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "discovery failed; treating scan as empty");
                BTreeSet::new()
            }
        };
        if let Some(name) = &self.excluded {
            discovered.remove(name);
        }

        let positions = self.positions.snapshot().await;
        let mut registry = self.registry.lock().await;
        let reconciled = registry.reconcile(&discovered, &positions).await;

        let mut attached = 0;
        for tail in registry.tails() {
            let stream = tail.lock().await.take_stream();
            if let Some(stream) = stream {
                tokio::spawn(run_assembler(Arc::clone(self), Arc::clone(tail), stream));
                attached += 1;
            }
        }

        let mut evicted = 0;
        if let Some(after) = self.config.evict_after() {
            for file_id in registry.evict_missing(after).await {
                if let Err(e) = self.positions.forget(&file_id).await {
                    warn!(file_id = %file_id, error = %e, "failed to drop evicted position");
                }
                evicted += 1;
            }
        }

        let summary = ScanSummary {
            discovered: reconciled.discovered,
            opened: reconciled.opened + reconciled.reopened,
            failed: reconciled.failed,
            attached,
            evicted,
        };
        debug!(?summary, "scan complete");
        summary
    }

    /// Hands `entry` to the pipeline and persists `end_offset` once it succeeded.
    async fn dispatch(&self, entry: Entry, end_offset: u64) {
        let context = ExecutionContext::new(entry.file_id(), end_offset);
        match self.pipeline.execute(&context, entry).await {
            Ok(()) => self.persist(&context.file_id, end_offset).await,
            Err(e) => {
                error!(file_id = %context.file_id, offset = end_offset, error = %e, "pipeline rejected entry");
            }
        }
    }

    async fn persist(&self, file_id: &str, offset: u64) {
        if let Err(e) = self.positions.record(file_id, offset).await {
            warn!(file_id = %file_id, offset, error = %e, "failed to persist position");
        }
    }
}

/// Assembles and dispatches the lines of one stream, one record at a time.
async fn run_assembler(context: Arc<DispatchContext>, tail: SharedTail, mut stream: LineStream) {
    let file_id = tail.lock().await.file_id().to_string();
    let assembler = RecordAssembler::new(file_id.clone(), context.config.max_fragment_bytes);
    let mut halt_rx = context.halt_rx.clone();
    debug!(file_id = %file_id, offset = stream.start_offset(), "assembler attached");

    loop {
        let item = tokio::select! {
            _ = halt_rx.changed() => break,
            item = stream.next() => item,
        };

        let line = match item {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(file_id = %file_id, error = %e, "stream ended; reopening on next scan");
                break;
            }
            None => break,
        };

        let (outcome, end_offset) = {
            let mut state = tail.lock().await;
            let outcome = assembler.push(state.progress_mut(), &line);
            (outcome, state.bytes_consumed())
        };

        match outcome {
            None => {}
            Some(Ok(entry)) => context.dispatch(entry, end_offset).await,
            Some(Err(e)) => {
                error!(file_id = %file_id, offset = end_offset, error = %e, "dropping malformed record");
                context.persist(&file_id, end_offset).await;
            }
        }
    }

    drop(stream);
    tail.lock().await.mark_closed();
    debug!(file_id = %file_id, "assembler detached");
}

/// File name to hide from discovery when `position_file` sits in `watch_dir`.
fn excluded_name(watch_dir: &Path, position_file: &Path) -> Option<String> {
    let parent = position_file.parent()?;
    let parent = std::path::absolute(parent).ok()?;
    let watch_dir = std::path::absolute(watch_dir).ok()?;
    if parent != watch_dir {
        return None;
    }
    position_file
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}
