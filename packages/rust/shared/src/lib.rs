//! Shared types, error model, collaborator traits and configuration for chaptersync.
//!
//! This crate is the foundation depended on by all other chaptersync crates.
//! It provides:
//! - [`SyncError`]: the unified error type
//! - Domain types ([`ChapterRecord`], [`StoreMetadata`], [`ManifestDocument`], [`Revision`])
//! - Collaborator contracts ([`ContentFetcher`], [`Transformer`])
//! - Configuration ([`AppConfig`], [`ProjectConfig`], config loading)

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExportConfig, ProjectConfig, ProjectEntry, ProjectPaths,
    RedditConfig, SyncConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{Result, SyncError};
pub use traits::{ContentFetcher, FetchedChapter, TransformContext, Transformer};
pub use types::{
    ChapterRecord, ManifestChapter, ManifestDocument, Revision, StoreIdentity, StoreMetadata,
    MAX_FILENAME_BYTES, chapter_filename, sanitize_title,
};
