//! Collaborator contracts the synchronization core is written against.
//!
//! The core never talks to the network or knows any cleanup rule directly.
//! It drives a [`ContentFetcher`] to fill the raw store and a [`Transformer`]
//! to fill the processed store.

use std::future::Future;

use crate::error::Result;
use crate::types::Revision;

/// A chapter as returned by the remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedChapter {
    /// Stable remote id of the chapter (embedded in the file name).
    pub id: String,
    /// Revision of the fetched text.
    pub revision: Revision,
    /// Title as published.
    pub title: String,
    /// Full chapter text.
    pub text: String,
}

/// Fetches the current content of one chapter.
pub trait ContentFetcher {
    /// Fetch the chapter identified by `url`.
    ///
    /// Any error is treated as a record-level failure unless
    /// [`SyncError::is_fatal`](crate::SyncError::is_fatal) says otherwise.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedChapter>> + Send;
}

/// What a transformer knows about the chapter it is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformContext {
    pub url: String,
    pub filename: String,
    pub title: Option<String>,
    pub revision: Revision,
}

/// Turns raw chapter text into its processed form.
pub trait Transformer {
    fn transform(&self, text: &str, ctx: &TransformContext) -> Result<String>;
}

impl<T: Transformer + ?Sized> Transformer for &T {
    fn transform(&self, text: &str, ctx: &TransformContext) -> Result<String> {
        (**self).transform(text, ctx)
    }
}
