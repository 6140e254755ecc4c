//! Lists candidate log files in the watched directory.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;

/// Returns the names of the regular files directly inside `dir`.
///
/// Hidden files are skipped; the position store writes its temporary files
/// with a leading dot and they must never be tailed.
pub async fn list(dir: &Path) -> Result<BTreeSet<String>> {
    let discovery_error = |source: std::io::Error| Error::Discovery {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(discovery_error)?;
    let mut files = BTreeSet::new();

    while let Some(entry) = entries.next_entry().await.map_err(discovery_error)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }

        // Follows symlinks; container log dirs are usually links into the runtime's storage.
        match fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_file() => {
                files.insert(name);
            }
            _ => {}
        }
    }

    Ok(files)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
