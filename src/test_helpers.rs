//! Test utilities for temporary log directories and recording pipelines.

use crate::error::{Error, Result};
use crate::pipeline::{Entry, ExecutionContext, Pipeline};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// A temporary watched directory plus a separate spot for the position file.
pub struct TempLogDir {
    logs: PathBuf,
    positions: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TempLogDir {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let logs = temp_dir.path().join("logs");
        fs::create_dir(&logs)?;
        let positions = temp_dir.path().join("state").join("positions.json");

        Ok(Self {
            logs,
            positions,
            _temp_dir: temp_dir,
        })
    }

    /// The watched directory.
    pub fn path(&self) -> &Path {
        &self.logs
    }

    pub fn positions_path(&self) -> &Path {
        &self.positions
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.logs.join(name)
    }

    /// Creates or replaces `name` with `content`.
    pub fn write(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.file_path(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Appends `content` verbatim, without adding a newline.
    pub fn append(&self, name: &str, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(name))?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }

    /// Truncate the file (simulate copytruncate rotation)
    pub fn truncate(&self, name: &str) -> std::io::Result<()> {
        fs::File::create(self.file_path(name))?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> std::io::Result<()> {
        fs::remove_file(self.file_path(name))
    }
}

/// A pipeline that keeps every entry it is given.
///
/// Entries whose payload has `"fail": true` are rejected after being recorded.
#[derive(Default)]
pub struct RecordingPipeline {
    calls: Mutex<Vec<(ExecutionContext, Entry)>>,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Waits until at least `count` entries arrived, panicking after `timeout`.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Entry> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.len() < count {
            if tokio::time::Instant::now() >= deadline {
                panic!("expected {} entries, got {}", count, self.len());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.entries()
    }
}

#[async_trait]
impl Pipeline for RecordingPipeline {
    async fn execute(&self, context: &ExecutionContext, entry: Entry) -> Result<()> {
        let fail = entry.get("fail") == Some(&serde_json::Value::Bool(true));
        self.calls.lock().unwrap().push((context.clone(), entry));

        if fail {
            return Err(Error::Pipeline {
                stage: "recording".to_string(),
                message: "rejected on request".to_string(),
            });
        }
        Ok(())
    }
}

/// Polls `condition` until it holds, panicking after `timeout`.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_temp_log_dir_layout() {
        let dir = TempLogDir::new().unwrap();
        assert!(dir.path().is_dir());
        assert!(!dir.positions_path().starts_with(dir.path()));
    }

    #[test]
    fn test_write_append_truncate() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("a.log", "one").unwrap();
        dir.append("a.log", "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "onetwo");

        dir.truncate("a.log").unwrap();
        assert!(fs::read_to_string(&path).unwrap().is_empty());

        dir.remove("a.log").unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_recording_pipeline_rejects_on_request() {
        let pipeline = RecordingPipeline::new();
        let context = ExecutionContext::new("a.log", 1);

        let ok = Entry::new("a.log", json!({"n": 1}).as_object().cloned().unwrap());
        let bad = Entry::new("a.log", json!({"fail": true}).as_object().cloned().unwrap());

        assert!(pipeline.execute(&context, ok).await.is_ok());
        assert!(pipeline.execute(&context, bad).await.is_err());
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.contexts()[0], context);
    }
}
