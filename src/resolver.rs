//! Resolution of the single active model.
//!
//! The authority keeps at most one document active; locally that is a
//! convention, not a guarantee. Resolution trusts the active index when it
//! still matches reality and otherwise falls back to scanning the cache,
//! first active document wins, rewriting the index to pin the result.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::document::ModelConfig;
use crate::error::Result;
use crate::store::{ActiveIndex, ModelStore};

/// The active cached document and where it lives.
#[derive(Clone, Debug)]
pub struct ActiveModel {
    pub path: PathBuf,
    pub config: ModelConfig,
}

/// Find the active model, or `None` when the cache is empty, nothing is
/// active, or every candidate fails to parse.
pub async fn resolve(store: &ModelStore) -> Option<ActiveModel> {
    if let Some(index) = store.read_index().await {
        let path = store.artifact_path(&index.filename);
        match store.read_document(&path).await {
            Ok(config)
                if config.is_active() && config.model_name() == index.model_name =>
            {
                debug!(model = %index.model_name, "active model served from index");
                return Some(ActiveModel { path, config });
            }
            Ok(_) => {
                warn!(model = %index.model_name, "active index is stale, rescanning");
            }
            Err(e) => {
                warn!(model = %index.model_name, error = %e, "indexed document unreadable, rescanning");
            }
        }
    }

    match rescan(store).await {
        Ok(active) => active,
        Err(e) => {
            warn!(error = %e, "active model scan failed");
            None
        }
    }
}

/// Scan the cache for the first document whose active flag is set, skipping
/// documents that fail to parse, and rewrite the index to match the result.
/// The sync engine runs this at the end of every refresh.
pub async fn rescan(store: &ModelStore) -> Result<Option<ActiveModel>> {
    let mut active = None;
    for path in store.enumerate().await? {
        let config = match store.read_document(&path).await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "skipping unreadable document");
                continue;
            }
        };
        if config.is_active() {
            active = Some(ActiveModel { path, config });
            break;
        }
    }

    // The index is bookkeeping, not the result; a failed rewrite degrades
    // to scan-only resolution next time and never discards what was found.
    match &active {
        Some(found) => {
            if let Some(filename) = found.path.file_name() {
                let index = ActiveIndex {
                    model_name: found.config.model_name().to_string(),
                    filename: filename.to_string_lossy().into_owned(),
                };
                if let Err(e) = store.write_index(&index).await {
                    warn!(error = %e, "failed to rewrite the active index");
                }
            }
        }
        None => {
            if let Err(e) = store.clear_index().await {
                warn!(error = %e, "failed to clear the active index");
            }
        }
    }

    Ok(active)
}
