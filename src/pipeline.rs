//! The processing pipeline entries are handed to.
//!
//! The dispatcher only knows [`Pipeline::execute`]. [`StagedPipeline`] is the
//! stock implementation: an ordered list of [`Stage`]s registered at startup,
//! each enriching or shipping the entry in turn.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Field carrying the source file name when an entry is rendered as JSON.
pub const FILENAME_FIELD: &str = "_filename";

/// One structured record read from a tailed file.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    file_id: String,
    payload: Map<String, Value>,
}

impl Entry {
    pub fn new(file_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            file_id: file_id.into(),
            payload,
        }
    }

    /// Name of the file the record came from.
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Sets `field`, replacing any value the record already had.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(field.into(), value.into());
    }

    /// The payload with the source file name attached as [`FILENAME_FIELD`].
    pub fn to_json(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert(FILENAME_FIELD.to_string(), Value::String(self.file_id.clone()));
        Value::Object(object)
    }
}

/// Per-call information passed along with an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// File the entry was read from.
    pub file_id: String,
    /// Offset just past the entry's last byte.
    pub end_offset: u64,
}

impl ExecutionContext {
    pub fn new(file_id: impl Into<String>, end_offset: u64) -> Self {
        Self {
            file_id: file_id.into(),
            end_offset,
        }
    }
}

/// Processes one entry to completion.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn execute(&self, context: &ExecutionContext, entry: Entry) -> Result<()>;
}

/// A single step of a [`StagedPipeline`].
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used when reporting failures.
    fn name(&self) -> &str;

    async fn process(&self, context: &ExecutionContext, entry: &mut Entry) -> Result<()>;
}

/// Runs each registered stage in order; the first failure ends the run.
#[derive(Default)]
pub struct StagedPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl StagedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.push(stage);
        self
    }

    pub fn push<S: Stage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for StagedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[async_trait]
impl Pipeline for StagedPipeline {
    async fn execute(&self, context: &ExecutionContext, mut entry: Entry) -> Result<()> {
        for stage in &self.stages {
            stage
                .process(context, &mut entry)
                .await
                .map_err(|e| match e {
                    Error::Pipeline { .. } => e,
                    other => Error::Pipeline {
                        stage: stage.name().to_string(),
                        message: other.to_string(),
                    },
                })?;
        }
        Ok(())
    }
}
