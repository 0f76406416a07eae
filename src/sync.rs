//! Full cache refresh against the remote catalog.
//!
//! A refresh mirrors the authority's current catalog into the local cache:
//! one sequential download per catalog filename, each staged to a hidden
//! temp file, verified and renamed into place. One bad artifact never aborts
//! the batch; it becomes a failed outcome and the loop moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::remote::{ArtifactFetch, Backend};
use crate::resolver;
use crate::store::ModelStore;

/// How one catalog entry fared during a refresh.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum FetchStatus {
    Completed { path: PathBuf },
    Failed { error: String },
}

/// Per-filename refresh result, in catalog order.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SyncOutcome {
    pub filename: String,
    pub status: FetchStatus,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, FetchStatus::Completed { .. })
    }
}

/// Result of one refresh. `success` reflects only the catalog fetch;
/// per-artifact failures live in `outcomes`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SyncReport {
    pub success: bool,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    fn catalog_unavailable() -> Self {
        Self {
            success: false,
            outcomes: Vec::new(),
        }
    }
}

/// Downloads the catalog into the store. Holds the store's mutation gate for
/// the whole batch, so concurrent refreshes and wipes serialize.
pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    store: Arc<ModelStore>,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<ModelStore>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            store,
            retry,
        }
    }

    /// Mirror the remote catalog into the local cache.
    ///
    /// A catalog fetch failure yields `success: false` with no outcomes and
    /// leaves the cache untouched. Otherwise every catalog filename gets an
    /// outcome, downloads run sequentially in catalog order, and the active
    /// index is rebuilt from the refreshed cache before the gate is released.
    pub async fn refresh(&self) -> SyncReport {
        let filenames = match self.backend.list_models().await {
            Ok(filenames) => filenames,
            Err(e) => {
                warn!(error = %e, "catalog fetch failed, keeping cache as is");
                return SyncReport::catalog_unavailable();
            }
        };

        let _gate = self.store.lock_mutations().await;
        info!(count = filenames.len(), "refreshing model cache");

        let mut outcomes = Vec::with_capacity(filenames.len());
        for filename in filenames {
            let status = match self.download(&filename).await {
                Ok(path) => FetchStatus::Completed { path },
                Err(e) => {
                    warn!(filename = %filename, error = %e, "artifact download failed");
                    FetchStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(SyncOutcome { filename, status });
        }

        if let Err(e) = resolver::rescan(&self.store).await {
            warn!(error = %e, "failed to rebuild active index after refresh");
        }

        SyncReport {
            success: true,
            outcomes,
        }
    }

    /// One artifact, with bounded retries. Credential rejections and other
    /// non-transient failures abort immediately.
    async fn download(&self, filename: &str) -> Result<PathBuf> {
        let mut attempt = 0u32;
        let mut delay = self.retry.initial_delay;

        loop {
            attempt += 1;
            match self.download_once(filename).await {
                Ok(path) => return Ok(path),
                Err(e) if !e.is_retryable() || attempt >= self.retry.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                    warn!(
                        filename = %filename,
                        attempt,
                        error = %e,
                        delay_ms = jittered.as_millis() as u64,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(jittered).await;
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.retry.backoff_multiplier)
                            .min(self.retry.max_delay.as_secs_f64()),
                    );
                }
            }
        }
    }

    async fn download_once(&self, filename: &str) -> Result<PathBuf> {
        let fetch = self.backend.fetch_model(filename).await?;

        let staging = self.store.staging_path(filename);
        let path = self.store.artifact_path(filename);
        self.store.ensure_root().await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = self.stage(filename, fetch, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(path)
    }

    /// Stream the artifact into its staging file and verify it. The caller
    /// removes the staging file on any failure.
    async fn stage(&self, filename: &str, fetch: ArtifactFetch, staging: &Path) -> Result<()> {
        let mut file = File::create(staging).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut stream = fetch.stream;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if let Some(declared) = fetch.declared_len {
            if written != declared {
                return Err(Error::verification(
                    filename,
                    format!("wrote {written} bytes, transport declared {declared}"),
                ));
            }
        }

        let digest = format!("{:x}", hasher.finalize());
        debug!(filename = %filename, bytes = written, sha256 = %digest, "artifact staged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{test_config, ModelConfig};
    use crate::remote::testing::FakeBackend;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn engine_with(
        backend: Arc<FakeBackend>,
        attempts: u32,
    ) -> (SyncEngine, Arc<ModelStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ModelStore::new(dir.path()));
        let engine = SyncEngine::new(
            backend,
            Arc::clone(&store),
            RetryPolicy::immediate(attempts),
        );
        (engine, store, dir)
    }

    fn cache_contents(dir: &TempDir) -> BTreeMap<String, String> {
        let mut contents = BTreeMap::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type().unwrap().is_file() {
                continue;
            }
            contents.insert(name, std::fs::read_to_string(entry.path()).unwrap());
        }
        contents
    }

    #[tokio::test]
    async fn refresh_mirrors_every_catalog_entry() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.add_doc("b.cfg", test_config("beta", false));
        backend.add_doc("c.cfg", test_config("gamma", false));
        let (engine, store, dir) = engine_with(Arc::clone(&backend), 1);

        let report = engine.refresh().await;

        assert!(report.success);
        let names: Vec<_> = report.outcomes.iter().map(|o| o.filename.as_str()).collect();
        assert_eq!(names, ["a.cfg", "b.cfg", "c.cfg"]);
        assert!(report.outcomes.iter().all(SyncOutcome::succeeded));

        for outcome in &report.outcomes {
            let FetchStatus::Completed { path } = &outcome.status else {
                panic!("expected completed outcome");
            };
            store.read_document(path).await.unwrap();
        }
        assert_eq!(cache_contents(&dir).len(), 3);
    }

    #[tokio::test]
    async fn catalog_failure_reports_nothing_and_keeps_the_cache() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_listing(true);
        let (engine, _store, dir) = engine_with(Arc::clone(&backend), 1);
        std::fs::write(
            dir.path().join("stale.cfg"),
            test_config("stale", false).to_yaml().unwrap(),
        )
        .unwrap();

        let report = engine.refresh().await;

        assert!(!report.success);
        assert!(report.outcomes.is_empty());
        assert!(cache_contents(&dir).contains_key("stale.cfg"));
    }

    #[tokio::test]
    async fn one_failed_artifact_does_not_abort_the_batch() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.add_doc("b.cfg", test_config("beta", false));
        backend.add_doc("c.cfg", test_config("gamma", false));
        backend.fail_download("b.cfg");
        let (engine, _store, dir) = engine_with(Arc::clone(&backend), 2);
        std::fs::write(dir.path().join("old.cfg"), "untouched").unwrap();

        let report = engine.refresh().await;

        assert!(report.success);
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].succeeded());
        assert!(!report.outcomes[1].succeeded());
        assert!(report.outcomes[2].succeeded());

        let FetchStatus::Failed { error } = &report.outcomes[1].status else {
            panic!("expected failed outcome for b.cfg");
        };
        assert!(error.contains("b.cfg"));

        let contents = cache_contents(&dir);
        assert!(contents.contains_key("a.cfg"));
        assert!(!contents.contains_key("b.cfg"));
        assert!(contents.contains_key("c.cfg"));
        assert_eq!(contents["old.cfg"], "untouched");
    }

    #[tokio::test]
    async fn two_refreshes_against_an_unchanged_remote_are_byte_identical() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.add_doc("b.cfg", test_config("beta", false));
        let (engine, _store, dir) = engine_with(Arc::clone(&backend), 1);

        engine.refresh().await;
        let first = cache_contents(&dir);
        engine.refresh().await;
        let second = cache_contents(&dir);

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn transient_download_failures_are_retried() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.fail_download_times("a.cfg", 2);
        let (engine, _store, _dir) = engine_with(Arc::clone(&backend), 3);

        let report = engine.refresh().await;
        assert!(report.outcomes[0].succeeded());
    }

    #[tokio::test]
    async fn length_mismatch_fails_verification_and_leaves_no_artifact() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.misdeclare_length("a.cfg");
        let (engine, store, dir) = engine_with(Arc::clone(&backend), 2);

        let report = engine.refresh().await;

        assert!(report.success);
        let FetchStatus::Failed { error } = &report.outcomes[0].status else {
            panic!("expected verification failure");
        };
        assert!(error.contains("transport declared"));
        assert!(cache_contents(&dir).is_empty());
        assert!(store.enumerate().await.unwrap().is_empty());
        assert!(!dir.path().join(".a.cfg.part").exists());
    }

    #[tokio::test]
    async fn artifacts_with_directory_components_are_mirrored() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("family/a.cfg", test_config("alpha", true));
        let (engine, store, dir) = engine_with(Arc::clone(&backend), 1);

        let report = engine.refresh().await;

        assert!(report.success);
        assert!(report.outcomes[0].succeeded());
        let path = dir.path().join("family").join("a.cfg");
        assert!(path.exists());
        let config = store.read_document(&path).await.unwrap();
        assert_eq!(config.model_name(), "alpha");
    }

    #[tokio::test]
    async fn a_broken_stream_leaves_no_staging_file() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.break_stream("a.cfg");
        let (engine, _store, dir) = engine_with(Arc::clone(&backend), 1);

        let report = engine.refresh().await;

        assert!(!report.outcomes[0].succeeded());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn refused_downloads_do_not_burn_the_retry_budget() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_phantom("ghost.cfg");
        let (engine, _store, _dir) = engine_with(Arc::clone(&backend), 3);

        let report = engine.refresh().await;

        assert!(!report.outcomes[0].succeeded());
        let FetchStatus::Failed { error } = &report.outcomes[0].status else {
            panic!("expected failed outcome");
        };
        assert!(error.contains("refused"));
        assert_eq!(backend.fetch_count("ghost.cfg"), 1);
    }

    #[tokio::test]
    async fn wiping_then_refreshing_matches_the_catalog_exactly() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", true));
        backend.add_doc("b.cfg", test_config("beta", false));
        let (engine, store, dir) = engine_with(Arc::clone(&backend), 1);
        std::fs::write(dir.path().join("zombie.cfg"), "left over").unwrap();

        store.wipe().await.unwrap();
        let report = engine.refresh().await;

        assert!(report.success);
        let contents = cache_contents(&dir);
        let names: Vec<_> = contents.keys().map(String::as_str).collect();
        assert_eq!(names, ["a.cfg", "b.cfg"]);
    }

    #[tokio::test]
    async fn refresh_rebuilds_the_active_index() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_doc("a.cfg", test_config("alpha", false));
        backend.add_doc("b.cfg", test_config("beta", true));
        let (engine, store, _dir) = engine_with(Arc::clone(&backend), 1);

        engine.refresh().await;

        let index = store.read_index().await.unwrap();
        assert_eq!(index.model_name, "beta");
        assert_eq!(index.filename, "b.cfg");
    }

    #[tokio::test]
    async fn corrupt_remote_documents_still_land_in_the_cache() {
        // The sync engine mirrors bytes; decoding problems surface later,
        // at read time, where scanning callers skip them.
        let backend = Arc::new(FakeBackend::new());
        backend.add_raw("bad.cfg", "soup: [unclosed");
        backend.add_doc("good.cfg", test_config("good", true));
        let (engine, store, _dir) = engine_with(Arc::clone(&backend), 1);

        let report = engine.refresh().await;

        assert!(report.outcomes.iter().all(SyncOutcome::succeeded));
        let paths = store.enumerate().await.unwrap();
        assert_eq!(paths.len(), 2);

        let bad = store.artifact_path("bad.cfg");
        assert!(matches!(
            store.read_document(&bad).await,
            Err(Error::Parse { .. })
        ));
        let good = store.artifact_path("good.cfg");
        let config: ModelConfig = store.read_document(&good).await.unwrap();
        assert_eq!(config.model_name(), "good");
    }
}
