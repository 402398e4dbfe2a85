//! Error types for chaptersync.
//!
//! Library crates use [`SyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Errors fall into two propagation classes. Store-level errors
//! ([`SyncError::Io`]) abort a reconciliation before its metadata write.
//! Everything else raised while producing a single chapter is a record-level
//! failure: the chapter is skipped and the next run picks it up again.

use std::path::PathBuf;

use crate::types::StoreIdentity;

/// Top-level error type for all chaptersync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the remote API.
    #[error("network error: {0}")]
    Network(String),

    /// Remote document could not be interpreted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A store's integrity check failed, or a document is malformed.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The upstream identity no longer matches the one a store was built from.
    #[error("identity mismatch: expected {expected}, found {found}")]
    IdentityMismatch {
        expected: StoreIdentity,
        found: StoreIdentity,
    },

    /// A single chapter could not be fetched.
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// A single chapter could not be transformed.
    #[error("transform failed for {filename}: {message}")]
    Transform { filename: String, message: String },

    /// Filesystem I/O error. Fatal for the current run.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Final document assembly failed.
    #[error("export error: {0}")]
    Export(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a fetch error for a chapter URL.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a transform error for a chapter file.
    pub fn transform(filename: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transform {
            filename: filename.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the surrounding reconciliation.
    ///
    /// Only filesystem failures qualify; every other error produced while
    /// handling one chapter is skipped and retried on the next run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
