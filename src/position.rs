//! Durable per-file read offsets.
//!
//! The position file is a single JSON object mapping a file name to the number
//! of bytes consumed from it, e.g. `{"app.log": 25}`. Writes go to a temporary
//! sibling file which is then renamed over the target, so a crash mid-write
//! leaves the previous version intact.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name to bytes consumed.
pub type Positions = BTreeMap<String, u64>;

/// Reads and writes the position file.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the mapping. A missing file is an empty mapping; unreadable or
    /// malformed content is an error.
    pub async fn load(&self) -> Result<Positions> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Positions::new()),
            Err(e) => return Err(Error::position_store(&self.path, e)),
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::position_store(&self.path, format!("invalid content: {e}")))
    }

    /// Like [`load`](Self::load) but any failure means "no prior state".
    pub async fn load_or_default(&self) -> Positions {
        match self.load().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "ignoring unusable position file; starting all files from offset 0");
                Positions::new()
            }
        }
    }

    /// Replaces the position file with the complete `positions` mapping.
    pub async fn save(&self, positions: &Positions) -> Result<()> {
        let encoded = serde_json::to_vec(positions)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::position_store(&self.path, e))?;
            }
        }

        let temp_path = self.temp_path();
        if let Err(e) = write_and_sync(&temp_path, &encoded).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::position_store(&self.path, e));
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::position_store(&self.path, e));
        }

        debug!(path = %self.path.display(), files = positions.len(), "saved positions");
        Ok(())
    }

    /// A unique hidden sibling of the position file.
    fn temp_path(&self) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "positions".to_string());

        self.path.with_file_name(format!(
            ".{file_name}.tmp.{}.{unique_id}",
            std::process::id()
        ))
    }
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// The in-memory position mapping shared by every tail, persisted on change.
///
/// Each update saves the whole mapping while holding the lock, so two saves
/// never interleave on disk.
#[derive(Debug)]
pub struct PositionBook {
    store: PositionStore,
    positions: Mutex<Positions>,
}

impl PositionBook {
    pub fn new(store: PositionStore, initial: Positions) -> Self {
        Self {
            store,
            positions: Mutex::new(initial),
        }
    }

    /// Seeds the book from the store, treating any read failure as empty.
    pub async fn open(store: PositionStore) -> Self {
        let initial = store.load_or_default().await;
        Self::new(store, initial)
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub async fn snapshot(&self) -> Positions {
        self.positions.lock().await.clone()
    }

    pub async fn get(&self, file_id: &str) -> Option<u64> {
        self.positions.lock().await.get(file_id).copied()
    }

    /// Records `offset` for `file_id` and persists the mapping.
    ///
    /// On a failed save the in-memory value is kept; the next successful
    /// save writes it out.
    pub async fn record(&self, file_id: &str, offset: u64) -> Result<()> {
        let mut positions = self.positions.lock().await;
        positions.insert(file_id.to_string(), offset);
        self.store.save(&positions).await
    }

    /// Drops `file_id` from the mapping and persists it.
    pub async fn forget(&self, file_id: &str) -> Result<()> {
        let mut positions = self.positions.lock().await;
        if positions.remove(file_id).is_none() {
            return Ok(());
        }
        self.store.save(&positions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store_in(dir: &tempfile::TempDir) -> PositionStore {
        PositionStore::new(dir.path().join("positions.json"))
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let positions = store.load().await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut positions = Positions::new();
        positions.insert("app.log".to_string(), 25);
        positions.insert("web_default_nginx-0123456789ab.log".to_string(), 4096);

        store.save(&positions).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, positions);
    }

    #[tokio::test]
    async fn test_file_format_is_flat_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut positions = Positions::new();
        positions.insert("app.log".to_string(), 25);
        store.save(&positions).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, r#"{"app.log":25}"#);
    }

    #[tokio::test]
    async fn test_load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"app.log": 25}"#).unwrap();

        let positions = store.load().await.unwrap();
        assert_eq!(positions.get("app.log"), Some(&25));
    }

    #[tokio::test]
    async fn test_malformed_file_is_error_not_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"app.log": 2"#).unwrap();

        let result = store.load().await;
        assert!(matches!(result, Err(Error::PositionStore { .. })));

        let positions = store.load_or_default().await;
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn test_negative_offsets_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"app.log": -1}"#).unwrap();

        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("nested/state/positions.json"));

        let mut positions = Positions::new();
        positions.insert("a.log".to_string(), 1);
        store.save(&positions).await.unwrap();
        positions.insert("b.log".to_string(), 2);
        store.save(&positions).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("nested/state"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["positions.json".to_string()]);
        assert_eq!(store.load().await.unwrap(), positions);
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = PositionStore::new(blocker.join("positions.json"));

        let result = store.save(&Positions::new()).await;
        assert!(matches!(result, Err(Error::PositionStore { .. })));
    }

    #[tokio::test]
    async fn test_book_record_persists_whole_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"old.log": 7}"#).unwrap();

        let book = PositionBook::open(store.clone()).await;
        book.record("app.log", 17).await.unwrap();

        let on_disk = store.load().await.unwrap();
        assert_eq!(on_disk.get("old.log"), Some(&7));
        assert_eq!(on_disk.get("app.log"), Some(&17));
        assert_eq!(book.get("app.log").await, Some(17));
    }

    #[tokio::test]
    async fn test_book_forget() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let book = PositionBook::new(store.clone(), Positions::new());

        book.record("a.log", 3).await.unwrap();
        book.record("b.log", 4).await.unwrap();
        book.forget("a.log").await.unwrap();
        book.forget("missing.log").await.unwrap();

        let on_disk = store.load().await.unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk.get("b.log"), Some(&4));
    }

    #[tokio::test]
    async fn test_concurrent_records_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let book = Arc::new(PositionBook::new(store_in(&dir), Positions::new()));

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let book = Arc::clone(&book);
            handles.push(tokio::spawn(async move {
                book.record(&format!("file{i}.log"), i * 10).await
            }));
        }
        for result in futures::future::join_all(handles).await {
            tokio_test::assert_ok!(result.unwrap());
        }

        let on_disk = book.store().load().await.unwrap();
        assert_eq!(on_disk.len(), 20);
        assert_eq!(on_disk.get("file19.log"), Some(&190));
        assert_eq!(on_disk, book.snapshot().await);
    }
}
