//! A container log-tailing agent.
//!
//! Log files in a watched directory are discovered on an interval and followed
//! by polling. Appended bytes are reassembled into JSON records, each record is
//! handed to a [`Pipeline`], and the byte offset reached in every file is
//! persisted so a restart resumes without re-emitting or losing entries.
//!
//! # Example
//!
//! ```rust,no_run
//! use podtail::{AgentConfig, ContainerMetadata, JsonLinesSink, StagedPipeline, start_agent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::new("/var/log/containers", "/var/log/podtail.json");
//!     let pipeline = StagedPipeline::new()
//!         .with_stage(ContainerMetadata)
//!         .with_stage(JsonLinesSink::stdout());
//!
//!     let dispatcher = start_agent(config, Arc::new(pipeline)).await?;
//!     tokio::signal::ctrl_c().await?;
//!     dispatcher.stop().await;
//!
//!     Ok(())
//! }
//! ```

mod assembler;
mod config;
mod discovery;
mod dispatcher;
mod error;
mod pipeline;
mod position;
mod reader;
mod registry;
mod stages;
mod stream;

#[cfg(test)]
mod test_helpers;

pub use assembler::{ReadProgress, RecordAssembler, is_complete};
pub use config::AgentConfig;
pub use discovery::list as discover_files;
pub use dispatcher::{Dispatcher, ScanSummary, TailSnapshot};
pub use error::{Error, Result};
pub use pipeline::{Entry, ExecutionContext, FILENAME_FIELD, Pipeline, Stage, StagedPipeline};
pub use position::{PositionBook, PositionStore, Positions};
pub use reader::RawLine;
pub use registry::{ReconcileSummary, SharedTail, TailRegistry, TailState};
pub use stages::{ContainerIdentity, ContainerMetadata, JsonLinesSink, parse_container_file_name};
pub use stream::LineStream;

use std::sync::Arc;

/// Builds a [`Dispatcher`] for `config` and starts scanning.
///
/// Returns once the first scan has run; later scans happen in the background
/// until [`Dispatcher::stop`] is called.
pub async fn start_agent(config: AgentConfig, pipeline: Arc<dyn Pipeline>) -> Result<Dispatcher> {
    let dispatcher = Dispatcher::new(config, pipeline).await?;
    dispatcher.start().await;
    Ok(dispatcher)
}
