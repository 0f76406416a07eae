//! Runtime settings loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;

/// Connection and cache settings for the engine.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Base URL of the remote authority, kept without a trailing slash.
    pub api_url: String,
    /// Static API key sent as `x-api-key` on every request.
    pub api_key: String,
    /// Directory holding the mirrored configuration documents.
    pub cache_dir: PathBuf,
    /// Backoff policy for artifact downloads.
    pub retry: RetryPolicy,
}

impl Settings {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, cache_dir: PathBuf) -> Self {
        let api_url = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            cache_dir,
            retry: RetryPolicy::default(),
        }
    }

    /// Loads settings from environment variables, reading `.env` first.
    ///
    /// - `ARGUS_API_URL`: remote authority base URL (default `http://127.0.0.1:5000`)
    /// - `ARGUS_API_KEY`: API key, required
    /// - `ARGUS_CACHE_DIR`: cache directory (default: platform data dir)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = std::env::var("ARGUS_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());

        let api_key = std::env::var("ARGUS_API_KEY")
            .context("ARGUS_API_KEY environment variable not set")?;

        let cache_dir = match std::env::var("ARGUS_CACHE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_cache_dir()?,
        };

        Ok(Self::new(api_url, api_key, cache_dir))
    }
}

fn default_cache_dir() -> anyhow::Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "argus", "Argus")
        .context("failed to resolve project directories")?;
    Ok(project_dirs.data_dir().join("models"))
}

/// Backoff policy for per-artifact download retries. Catalog listing and
/// mutation posts are single-attempt; only artifact fetches retry.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting between attempts, for tests.
    #[cfg(test)]
    pub(crate) fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 1.0,
        }
    }
}
