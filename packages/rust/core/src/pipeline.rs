//! End-to-end project sync: wiki → manifest → raw → processed → export.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use chaptersync_fetcher::RedditFetcher;
use chaptersync_manifest::ManifestFetcher;
use chaptersync_shared::{
    ExportConfig, ManifestDocument, ProjectConfig, RedditConfig, Result, SyncConfig, SyncError,
};
use chaptersync_storage::ChapterStore;
use chaptersync_transform::ChapterCleanup;

use crate::export::{ExportOptions, ExportResult, export};
use crate::processed_sync::sync_processed;
use crate::raw_sync::sync_raw;
use crate::reconcile::SyncReport;

/// Configuration for [`run_project`].
#[derive(Debug, Clone)]
pub struct ProjectRunConfig {
    pub project: ProjectConfig,
    /// Parent of every project directory.
    pub projects_dir: PathBuf,
    /// Where exported documents land.
    pub output_dir: PathBuf,
    pub reddit: RedditConfig,
    pub sync: SyncConfig,
    /// `None` skips the export stage.
    pub export: Option<ExportConfig>,
}

/// How the manifest for a run was obtained.
#[derive(Debug, Clone)]
pub struct ManifestUpdate {
    pub document: ManifestDocument,
    /// Snapshot written for a freshly fetched manifest.
    pub snapshot: Option<PathBuf>,
    /// True when the wiki was unreachable and the latest snapshot was used.
    pub from_snapshot: bool,
}

/// Result of [`run_project`].
#[derive(Debug)]
pub struct ProjectReport {
    pub project: String,
    pub manifest: ManifestUpdate,
    pub raw: SyncReport,
    pub processed: SyncReport,
    pub export: Option<ExportResult>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a queued chapter was produced and written.
    fn record_done(&self, label: &str, current: usize, total: usize);
    /// Called when a queued chapter was skipped.
    fn record_skipped(&self, label: &str, reason: &str, current: usize, total: usize);
    /// Called when a stage has converged.
    fn stage_done(&self, report: &SyncReport);
    /// Called when the whole project run completes.
    fn done(&self, report: &ProjectReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record_done(&self, _label: &str, _current: usize, _total: usize) {}
    fn record_skipped(&self, _label: &str, _reason: &str, _current: usize, _total: usize) {}
    fn stage_done(&self, _report: &SyncReport) {}
    fn done(&self, _report: &ProjectReport) {}
}

/// Fetch the project's manifest and snapshot it into `wiki_dir`.
///
/// When the wiki cannot be reached, the most recent snapshot for the same
/// identity stands in. Parse failures are never masked.
#[instrument(skip_all, fields(project = %project.name))]
pub async fn update_manifest(
    fetcher: &ManifestFetcher,
    project: &ProjectConfig,
    wiki_dir: &Path,
) -> Result<ManifestUpdate> {
    match fetcher.fetch(project).await {
        Ok(document) => {
            let snapshot = chaptersync_manifest::save_snapshot(wiki_dir, &document)?;
            Ok(ManifestUpdate {
                document,
                snapshot: Some(snapshot),
                from_snapshot: false,
            })
        }
        Err(SyncError::Network(msg)) => {
            match chaptersync_manifest::load_latest(wiki_dir, &project.identity())? {
                Some(document) => {
                    warn!(error = %msg, revision_date = %document.revision_date, "wiki unreachable, using latest snapshot");
                    Ok(ManifestUpdate {
                        document,
                        snapshot: None,
                        from_snapshot: true,
                    })
                }
                None => Err(SyncError::Network(msg)),
            }
        }
        Err(e) => Err(e),
    }
}

/// Run every stage for one project.
///
/// 1. Manifest: fetch the wiki page (or fall back to a snapshot)
/// 2. Raw: fetch new, updated and recently posted chapters
/// 3. Processed: transform whatever the raw stage changed
/// 4. Export: merge the processed store into one document
#[instrument(skip_all, fields(project = %config.project.name))]
pub async fn run_project(
    config: &ProjectRunConfig,
    progress: &dyn ProgressReporter,
) -> Result<ProjectReport> {
    let start = Instant::now();
    let paths = config.project.paths(&config.projects_dir);
    paths.create_all()?;

    info!(root = %paths.root.display(), "starting project sync");

    // --- Phase 1: Manifest ---
    progress.phase("Fetching manifest");
    let manifest_fetcher = ManifestFetcher::new(&config.reddit)?;
    let manifest = update_manifest(&manifest_fetcher, &config.project, &paths.wiki_dir).await?;

    // --- Phase 2: Raw ---
    let raw_store = ChapterStore::open(&paths.raw_dir)?;
    let fetcher = RedditFetcher::new(&config.reddit)?;
    let raw = sync_raw(
        &manifest.document,
        &raw_store,
        &fetcher,
        config.sync.raw_lookback,
        progress,
    )
    .await?;

    // --- Phase 3: Processed ---
    let processed_store = ChapterStore::open(&paths.processed_dir)?;
    let processed = sync_processed(
        &raw_store,
        &processed_store,
        &ChapterCleanup::default(),
        config.sync.processed_lookback,
        progress,
    )
    .await?;

    // --- Phase 4: Export ---
    let export = match &config.export {
        Some(export_config) => {
            progress.phase("Exporting document");
            let opts = ExportOptions::from_config(export_config, &config.output_dir, &paths.wiki_dir);
            Some(export(&processed_store, &manifest.document, &opts)?)
        }
        None => None,
    };

    let report = ProjectReport {
        project: config.project.name.clone(),
        manifest,
        raw,
        processed,
        export,
        elapsed: start.elapsed(),
    };

    info!(
        raw_chapters = report.raw.metadata.chapters.len(),
        processed_chapters = report.processed.metadata.chapters.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "project sync complete"
    );
    progress.done(&report);
    Ok(report)
}
