//! Processed stage: raw store → processed store, through a [`Transformer`].
//!
//! The raw store's metadata is the upstream. Each queued raw record is read
//! from the raw store, transformed, and written to the processed store under
//! the same file name. The processed record's revision is always copied from
//! the raw record, so the next diff compares like with like.

use tracing::instrument;

use chaptersync_shared::{
    ChapterRecord, Result, StoreMetadata, SyncError, TransformContext, Transformer,
};
use chaptersync_storage::ChapterStore;

use crate::pipeline::ProgressReporter;
use crate::reconcile::{
    ChapterSource, ProducedChapter, ReconcileOptions, Stage, SyncReport, UpstreamSnapshot,
    WorkItem, reconcile,
};

struct TransformSource<'a, T> {
    raw_store: &'a ChapterStore,
    raw_metadata: &'a StoreMetadata,
    transformer: &'a T,
}

impl<T: Transformer> TransformSource<'_, T> {
    fn transform_one(&self, item: &WorkItem) -> Result<ProducedChapter> {
        let source = item
            .entry
            .source
            .as_deref()
            .ok_or_else(|| SyncError::transform(&item.entry.url, "upstream entry has no raw file"))?;

        let raw = self
            .raw_metadata
            .find_by_filename(source)
            .ok_or_else(|| SyncError::transform(source, "raw store no longer holds this chapter"))?;

        let text = self.raw_store.read_content(&raw.filename).map_err(|e| match e {
            SyncError::Io { source: io, .. } if io.kind() == std::io::ErrorKind::NotFound => {
                SyncError::transform(&raw.filename, "raw content file is missing")
            }
            other => other,
        })?;

        let ctx = TransformContext {
            url: raw.url.clone(),
            filename: raw.filename.clone(),
            title: raw.title.clone(),
            revision: raw.revision,
        };
        let content = self.transformer.transform(&text, &ctx)?;

        Ok(ProducedChapter {
            record: ChapterRecord {
                url: raw.url.clone(),
                filename: raw.filename.clone(),
                title: raw.title.clone(),
                revision: raw.revision,
            },
            content,
        })
    }
}

impl<T: Transformer> ChapterSource for TransformSource<'_, T> {
    async fn produce(&self, item: &WorkItem) -> Result<ProducedChapter> {
        self.transform_one(item)
    }
}

/// Bring the processed store in line with the raw store.
///
/// Fails without touching the processed store when the raw metadata is
/// missing or unreadable.
#[instrument(skip_all)]
pub async fn sync_processed<T: Transformer>(
    raw_store: &ChapterStore,
    processed_store: &ChapterStore,
    transformer: &T,
    lookback: usize,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    progress.phase("Processing chapters");
    let raw_metadata = raw_store.load_metadata()?;
    let upstream = UpstreamSnapshot::from_metadata(&raw_metadata);

    let source = TransformSource {
        raw_store,
        raw_metadata: &raw_metadata,
        transformer,
    };
    let opts = ReconcileOptions::new(Stage::Processed).with_lookback(lookback);
    let report = reconcile(&upstream, processed_store, &source, &opts, progress).await?;
    progress.stage_done(&report);
    Ok(report)
}
