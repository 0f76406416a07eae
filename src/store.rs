//! Filesystem-backed cache of model configuration documents.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::document::ModelConfig;
use crate::error::{Error, Result};

/// Name of the active-model index kept inside the cache root. Dot-prefixed so
/// enumeration never mistakes it for a document, and `wipe` drops it together
/// with the documents it describes.
const ACTIVE_INDEX_FILE: &str = ".active-model.json";

/// Pointer to the cached document that was last known to be active.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActiveIndex {
    pub model_name: String,
    pub filename: String,
}

/// Directory of mirrored configuration artifacts.
///
/// Mutations (refresh batches, wipes) serialize on an internal gate. Reads
/// are unsynchronized and may observe mid-refresh state.
pub struct ModelStore {
    root: PathBuf,
    gate: Mutex<()>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gate: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the mutation gate. Held by the sync engine for a whole refresh
    /// batch; `wipe` takes it internally.
    pub async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Final path of a cached artifact.
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Staging path for an in-flight download: beside the final path, with a
    /// dot-prefixed file name. Invisible to `enumerate`, so an interrupted
    /// download never surfaces as a document.
    pub fn staging_path(&self, filename: &str) -> PathBuf {
        let path = self.root.join(filename);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.part"))
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// List cached document paths. Dot-prefixed entries and subdirectories
    /// are skipped. A missing cache root yields an empty list. Order follows
    /// directory enumeration and is not guaranteed stable.
    pub async fn enumerate(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    /// Read and decode one cached document.
    pub async fn read_document(&self, path: &Path) -> Result<ModelConfig> {
        let text = fs::read_to_string(path).await?;
        ModelConfig::from_yaml(&text).map_err(|e| Error::parse(path, e.to_string()))
    }

    /// Delete every entry under the cache root, the active index included.
    /// The root directory itself is kept. Returns the number of entries
    /// removed.
    pub async fn wipe(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
            removed += 1;
        }

        debug!(removed, root = %self.root.display(), "wiped model cache");
        Ok(removed)
    }

    /// Read the active-model index. Any failure (missing file, stale schema)
    /// means there is no usable index and the caller falls back to scanning.
    pub async fn read_index(&self) -> Option<ActiveIndex> {
        let path = self.root.join(ACTIVE_INDEX_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read active index");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "active index is unreadable, ignoring");
                None
            }
        }
    }

    /// Rewrite the active-model index atomically (staging file + rename).
    pub async fn write_index(&self, index: &ActiveIndex) -> Result<()> {
        self.ensure_root().await?;
        let path = self.root.join(ACTIVE_INDEX_FILE);
        let staging = self.root.join(format!("{ACTIVE_INDEX_FILE}.part"));

        let text = serde_json::to_string_pretty(index)?;
        fs::write(&staging, text).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    /// Remove the active-model index, if present.
    pub async fn clear_index(&self) -> Result<()> {
        let path = self.root.join(ACTIVE_INDEX_FILE);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_config;
    use tempfile::TempDir;

    fn test_store() -> (ModelStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (ModelStore::new(dir.path()), dir)
    }

    fn write_doc(dir: &TempDir, filename: &str, name: &str, active: bool) {
        let text = test_config(name, active).to_yaml().unwrap();
        std::fs::write(dir.path().join(filename), text).unwrap();
    }

    #[test]
    fn staging_paths_dot_prefix_only_the_file_name() {
        let store = ModelStore::new("/cache");
        assert_eq!(
            store.staging_path("a.cfg"),
            PathBuf::from("/cache/.a.cfg.part")
        );
        assert_eq!(
            store.staging_path("family/a.cfg"),
            PathBuf::from("/cache/family/.a.cfg.part")
        );
    }

    #[tokio::test]
    async fn enumerate_is_empty_for_a_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("not-created-yet"));
        assert!(store.enumerate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enumerate_skips_dot_entries_and_directories() {
        let (store, dir) = test_store();
        write_doc(&dir, "a.cfg", "alpha", true);
        std::fs::write(dir.path().join(".active-model.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".b.cfg.part"), "partial").unwrap();
        std::fs::create_dir(dir.path().join("weights")).unwrap();

        let paths = store.enumerate().await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].file_name().unwrap(), "a.cfg");
    }

    #[tokio::test]
    async fn read_document_reports_parse_failures_with_the_path() {
        let (store, dir) = test_store();
        std::fs::write(dir.path().join("broken.cfg"), "main: [not, a, mapping]").unwrap();

        let err = store
            .read_document(&dir.path().join("broken.cfg"))
            .await
            .unwrap_err();
        match err {
            Error::Parse { path, .. } => {
                assert!(path.to_string_lossy().ends_with("broken.cfg"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wipe_clears_documents_and_index_but_keeps_the_root() {
        let (store, dir) = test_store();
        write_doc(&dir, "a.cfg", "alpha", true);
        write_doc(&dir, "b.cfg", "beta", false);
        store
            .write_index(&ActiveIndex {
                model_name: "alpha".into(),
                filename: "a.cfg".into(),
            })
            .await
            .unwrap();

        let removed = store.wipe().await.unwrap();
        assert_eq!(removed, 3);
        assert!(dir.path().exists());
        assert!(store.enumerate().await.unwrap().is_empty());
        assert!(store.read_index().await.is_none());
    }

    #[tokio::test]
    async fn index_round_trips_and_tolerates_garbage() {
        let (store, dir) = test_store();
        let index = ActiveIndex {
            model_name: "alpha".into(),
            filename: "a.cfg".into(),
        };
        store.write_index(&index).await.unwrap();
        assert_eq!(store.read_index().await, Some(index));

        std::fs::write(dir.path().join(ACTIVE_INDEX_FILE), "not json").unwrap();
        assert!(store.read_index().await.is_none());

        store.clear_index().await.unwrap();
        store.clear_index().await.unwrap();
    }
}
