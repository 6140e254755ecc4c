//! Agent configuration, read from the command line or the environment.

use crate::error::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WATCH_DIR: &str = "/var/log/containers";
pub const DEFAULT_POSITION_FILE: &str = "/var/log/podtail.json";
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_READ_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 1024 * 1024;

/// Options recognized by the agent. They are fixed for the lifetime of a
/// [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Parser)]
#[command(name = "podtail", version, about = "Tail container JSON logs into a pipeline")]
pub struct AgentConfig {
    /// Directory holding the container log files
    #[arg(long("watch-dir"), env = "PODTAIL_WATCH_DIR", default_value = DEFAULT_WATCH_DIR)]
    pub watch_dir: PathBuf,

    /// Milliseconds between directory scans
    #[arg(
        long("scan-interval-ms"),
        env = "PODTAIL_SCAN_INTERVAL_MS",
        default_value_t = DEFAULT_SCAN_INTERVAL_MS
    )]
    pub scan_interval_ms: u64,

    /// File holding the persisted read offsets
    #[arg(
        long("position-file"),
        env = "PODTAIL_POSITION_FILE",
        default_value = DEFAULT_POSITION_FILE
    )]
    pub position_file: PathBuf,

    /// Milliseconds an open tail waits at end of file before checking for new bytes
    #[arg(
        long("read-poll-interval-ms"),
        env = "PODTAIL_READ_POLL_INTERVAL_MS",
        default_value_t = DEFAULT_READ_POLL_INTERVAL_MS
    )]
    pub read_poll_interval_ms: u64,

    /// Largest record, in bytes, kept in memory; longer records are dropped as malformed
    #[arg(
        long("max-fragment-bytes"),
        env = "PODTAIL_MAX_FRAGMENT_BYTES",
        default_value_t = DEFAULT_MAX_FRAGMENT_BYTES
    )]
    pub max_fragment_bytes: usize,

    /// Forget files that have been gone from the directory this many seconds
    #[arg(long("evict-after-secs"), env = "PODTAIL_EVICT_AFTER_SECS")]
    pub evict_after_secs: Option<u64>,

    /// Skip deriving pod/namespace/container fields from the file name
    #[arg(long("no-metadata"), env = "PODTAIL_NO_METADATA")]
    pub no_metadata: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from(DEFAULT_WATCH_DIR),
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            position_file: PathBuf::from(DEFAULT_POSITION_FILE),
            read_poll_interval_ms: DEFAULT_READ_POLL_INTERVAL_MS,
            max_fragment_bytes: DEFAULT_MAX_FRAGMENT_BYTES,
            evict_after_secs: None,
            no_metadata: false,
        }
    }
}

impl AgentConfig {
    /// Config watching `watch_dir` and persisting to `position_file`, other options defaulted.
    pub fn new(watch_dir: impl Into<PathBuf>, position_file: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            position_file: position_file.into(),
            ..Self::default()
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }

    pub fn evict_after(&self) -> Option<Duration> {
        self.evict_after_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_ms == 0 {
            return Err(Error::Config("scan interval must be greater than zero".into()));
        }
        if self.read_poll_interval_ms == 0 {
            return Err(Error::Config(
                "read poll interval must be greater than zero".into(),
            ));
        }
        if self.max_fragment_bytes == 0 {
            return Err(Error::Config(
                "max fragment bytes must be greater than zero".into(),
            ));
        }
        if self.watch_dir.as_os_str().is_empty() {
            return Err(Error::Config("watch directory must be set".into()));
        }
        if self.position_file.as_os_str().is_empty() {
            return Err(Error::Config("position file must be set".into()));
        }
        Ok(())
    }
}
