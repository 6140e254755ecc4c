//! Built-in pipeline stages.

use crate::error::{Error, Result};
use crate::pipeline::{Entry, ExecutionContext, Stage};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Length of the container id slug kept from the file name.
const CONTAINER_SLUG_LEN: usize = 12;

/// Identity of a container, as encoded in its log file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub pod: String,
    pub namespace: String,
    pub service: String,
    pub container: String,
}

impl ContainerIdentity {
    /// `<namespace>.<service>`
    pub fn system(&self) -> String {
        format!("{}.{}", self.namespace, self.service)
    }
}

/// Parses `<pod>_<namespace>_<service>-<container id>.log`.
pub fn parse_container_file_name(file_name: &str) -> Option<ContainerIdentity> {
    let base = Path::new(file_name).file_name()?.to_str()?;
    let mut parts = base.splitn(3, '_');
    let pod = parts.next()?;
    let namespace = parts.next()?;
    let rest = parts.next()?;

    let (service, hash) = rest.rsplit_once('-')?;
    if pod.is_empty() || namespace.is_empty() || service.is_empty() || hash.is_empty() {
        return None;
    }

    Some(ContainerIdentity {
        pod: pod.to_string(),
        namespace: namespace.to_string(),
        service: service.to_string(),
        container: hash.chars().take(CONTAINER_SLUG_LEN).collect(),
    })
}

/// Adds `pod`, `namespace`, `service`, `system`, `hostname` and `container`
/// fields derived from the entry's file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerMetadata;

#[async_trait]
impl Stage for ContainerMetadata {
    fn name(&self) -> &str {
        "container-metadata"
    }

    async fn process(&self, _context: &ExecutionContext, entry: &mut Entry) -> Result<()> {
        let Some(identity) = parse_container_file_name(entry.file_id()) else {
            debug!(file_id = %entry.file_id(), "file name carries no container identity");
            return Ok(());
        };

        let system = identity.system();
        entry.insert("pod", identity.pod);
        entry.insert("service", identity.service);
        entry.insert("namespace", identity.namespace);
        entry.insert("system", system.clone());
        entry.insert("hostname", system);
        entry.insert("container", identity.container);
        Ok(())
    }
}

/// Writes each entry as one line of JSON.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Stage for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn process(&self, _context: &ExecutionContext, entry: &mut Entry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry.to_json())?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        written.map_err(|e| Error::Pipeline {
            stage: self.name().to_string(),
            message: e.to_string(),
        })
    }
}
