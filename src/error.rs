//! Error types for cache, sync and remote operations.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories surfaced by the engine. None of these are fatal to the
/// caller: every operation degrades to an empty or partial result plus a
/// reported message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The remote authority could not be reached, or the transport failed.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote authority rejected the API key.
    #[error("remote rejected credentials")]
    AuthRejected,

    /// A cached document could not be decoded. Scanning callers skip the
    /// document and continue.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A schedule entry carries no time windows. Fails the one rule derived
    /// from it, never the whole projection.
    #[error("detection schedule for '{0}' has no time windows")]
    MalformedSchedule(String),

    /// A mutation endpoint answered non-2xx. The message is the server's own
    /// response text, surfaced verbatim.
    #[error("mutation rejected: {0}")]
    MutationRejected(String),

    /// A downloaded artifact did not match what the remote declared.
    #[error("artifact verification failed for {filename}: {reason}")]
    Verification { filename: String, reason: String },

    /// The authority refused to serve an artifact (HTTP 4xx). The artifact
    /// will not appear by retrying.
    #[error("download of {filename} refused: {reason}")]
    DownloadRefused { filename: String, reason: String },

    /// JSON encoding/decoding error (active index, mutation payloads).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an `Unavailable` error with the given message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a `Parse` error for the given document path.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a `MutationRejected` error carrying the server's response text.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::MutationRejected(msg.into())
    }

    /// Create a `Verification` error for the given artifact.
    pub fn verification(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Verification {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Create a `DownloadRefused` error for the given artifact.
    pub fn download_refused(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadRefused {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is worth another attempt. Credential rejections
    /// and malformed documents never recover by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Verification { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_document() {
        let err = Error::parse("/cache/person_v2.cfg", "missing field `detector`");
        assert!(err.to_string().contains("person_v2.cfg"));
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn rejected_message_is_surfaced_verbatim() {
        let err = Error::rejected("Model not found");
        assert_eq!(err.to_string(), "mutation rejected: Model not found");
    }

    #[test]
    fn auth_rejection_is_not_retryable() {
        assert!(!Error::AuthRejected.is_retryable());
        assert!(!Error::MalformedSchedule("dog".into()).is_retryable());
        assert!(!Error::download_refused("a.cfg", "status 404").is_retryable());
        assert!(Error::unavailable("connection refused").is_retryable());
        assert!(Error::verification("a.cfg", "short read").is_retryable());
    }
}
