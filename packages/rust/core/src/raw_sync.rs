//! Raw stage: manifest → raw store, through a [`ContentFetcher`].

use tracing::instrument;

use chaptersync_shared::{
    ChapterRecord, ContentFetcher, ManifestDocument, Result, chapter_filename,
};
use chaptersync_storage::ChapterStore;

use crate::pipeline::ProgressReporter;
use crate::reconcile::{
    ChapterSource, ProducedChapter, ReconcileOptions, Stage, SyncReport, UpstreamSnapshot,
    WorkItem, reconcile,
};

/// Fetches each queued url and names the file after what came back.
struct FetchSource<'a, F> {
    fetcher: &'a F,
}

impl<F: ContentFetcher> ChapterSource for FetchSource<'_, F> {
    async fn produce(&self, item: &WorkItem) -> Result<ProducedChapter> {
        let fetched = self.fetcher.fetch(&item.entry.url).await?;
        let filename = chapter_filename(fetched.revision, &fetched.id, &fetched.title);

        Ok(ProducedChapter {
            record: ChapterRecord {
                url: item.entry.url.clone(),
                filename,
                title: Some(fetched.title),
                revision: fetched.revision,
            },
            content: fetched.text,
        })
    }
}

/// Bring the raw store in line with `manifest`.
#[instrument(skip_all, fields(chapters = manifest.chapters.len()))]
pub async fn sync_raw<F: ContentFetcher>(
    manifest: &ManifestDocument,
    raw_store: &ChapterStore,
    fetcher: &F,
    lookback: usize,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    progress.phase("Syncing raw chapters");
    let upstream = UpstreamSnapshot::from_manifest(manifest);
    let opts = ReconcileOptions::new(Stage::Raw).with_lookback(lookback);
    let report = reconcile(&upstream, raw_store, &FetchSource { fetcher }, &opts, progress).await?;
    progress.stage_done(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chaptersync_shared::{FetchedChapter, ManifestChapter, Revision, SyncError};

    use crate::pipeline::SilentProgress;

    /// Serves chapters from a map; unknown urls fail like a 404.
    struct MapFetcher {
        chapters: Mutex<HashMap<String, FetchedChapter>>,
    }

    impl MapFetcher {
        fn new() -> Self {
            Self {
                chapters: Mutex::new(HashMap::new()),
            }
        }

        fn put(&self, url: &str, id: &str, rev: i64, title: &str) {
            self.chapters.lock().unwrap().insert(
                url.to_string(),
                FetchedChapter {
                    id: id.into(),
                    revision: Revision(rev),
                    title: title.into(),
                    text: format!("text of {title} at {rev}"),
                },
            );
        }
    }

    impl ContentFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedChapter> {
            self.chapters
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| SyncError::fetch(url, "HTTP 404"))
        }
    }

    fn manifest(urls: &[&str]) -> ManifestDocument {
        ManifestDocument {
            subreddit: "HFY".into(),
            wiki_uri: "series/test".into(),
            wiki_section: "Test".into(),
            revision_date: "2024-01-01".into(),
            author: Some("someone".into()),
            chapters: urls
                .iter()
                .map(|u| ManifestChapter {
                    url: u.to_string(),
                    title: u.to_uppercase(),
                })
                .collect(),
        }
    }

    fn temp_store() -> ChapterStore {
        let dir = std::env::temp_dir().join(format!("cs-raw-sync-test-{}", uuid::Uuid::now_v7()));
        ChapterStore::open(dir).expect("open store")
    }

    #[tokio::test]
    async fn first_run_fetches_everything() {
        let store = temp_store();
        let fetcher = MapFetcher::new();
        fetcher.put("u/1", "aaa", 100, "Chapter 1");
        fetcher.put("u/2", "bbb", 200, "Chapter 2/3");

        let report = sync_raw(&manifest(&["u/1", "u/2"]), &store, &fetcher, 2, &SilentProgress)
            .await
            .unwrap();

        assert!(report.full_resync);
        assert_eq!(report.new, 2);
        let rec = report.metadata.find_by_url("u/2").unwrap();
        assert_eq!(rec.filename, "200 - bbb - [Chapter 2-3].md");
        assert_eq!(rec.title.as_deref(), Some("Chapter 2/3"));
        assert_eq!(store.read_content(&rec.filename).unwrap(), "text of Chapter 2/3 at 200");
        assert!(store.validate(Some(&manifest(&[]).identity())));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn author_continuation_replaces_old_file() {
        let store = temp_store();
        let fetcher = MapFetcher::new();
        fetcher.put("u/1", "aaa", 100, "Chapter 1");
        let m = manifest(&["u/1"]);
        sync_raw(&m, &store, &fetcher, 2, &SilentProgress).await.unwrap();

        // A newly listed chapter brings the stored one back up for a re-check.
        fetcher.put("u/1", "aaa", 150, "Chapter 1");
        let m = manifest(&["u/1", "u/2"]);
        let report = sync_raw(&m, &store, &fetcher, 2, &SilentProgress).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.rechecked, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(
            store.content_files().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["150 - aaa - [Chapter 1].md".to_string()]
        );
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn very_long_title_is_stored_under_a_shortened_name() {
        let store = temp_store();
        let fetcher = MapFetcher::new();
        let title = "A Very Long Chapter Title ".repeat(12);
        fetcher.put("u/1", "aaa", 100, &title);

        let report = sync_raw(&manifest(&["u/1"]), &store, &fetcher, 0, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.new, 1);
        let rec = report.metadata.find_by_url("u/1").unwrap();
        assert!(rec.filename.len() <= chaptersync_shared::MAX_FILENAME_BYTES);
        assert_eq!(rec.title.as_deref(), Some(title.as_str()));
        assert!(store.content_path(&rec.filename).exists());
        assert!(store.validate(None));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn unlisted_chapters_are_retained() {
        let store = temp_store();
        let fetcher = MapFetcher::new();
        fetcher.put("u/1", "aaa", 100, "Chapter 1");
        fetcher.put("u/2", "bbb", 200, "Chapter 2");
        sync_raw(&manifest(&["u/1", "u/2"]), &store, &fetcher, 0, &SilentProgress)
            .await
            .unwrap();

        let report = sync_raw(&manifest(&["u/1"]), &store, &fetcher, 0, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.retained, 1);
        assert!(report.metadata.find_by_url("u/2").is_some());
        assert_eq!(store.content_files().unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(store.root());
    }
}
