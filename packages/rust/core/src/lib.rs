//! Reconciliation engine and pipeline orchestration for chaptersync.
//!
//! Ties the manifest, fetcher, transform and storage crates together: each
//! stage diffs an upstream snapshot against a chapter store and converges
//! the store (see [`reconcile::reconcile`]), and [`pipeline::run_project`]
//! chains the stages into one run.

pub mod collapse;
pub mod export;
pub mod pipeline;
pub mod processed_sync;
pub mod raw_sync;
pub mod reconcile;

pub use export::{ExportOptions, ExportResult, export};
pub use pipeline::{
    ManifestUpdate, ProgressReporter, ProjectReport, ProjectRunConfig, SilentProgress, run_project,
    update_manifest,
};
pub use processed_sync::sync_processed;
pub use raw_sync::sync_raw;
pub use reconcile::{Stage, SyncReport, SyncState};
