//! Store reconciliation: bring a downstream store in line with its upstream.
//!
//! A run walks an explicit state machine:
//!
//! ```text
//! Uninitialized ─┬─ store invalid ──▶ FullResync ──┐
//!                └─ store valid ───▶ IncrementalUpdate ─┬─▶ Converged
//!                                                        └─▶ Aborted (Err)
//! ```
//!
//! The decision of what to do is a pure function ([`plan`]), and so is the
//! folding of produced records into the baseline ([`merge`]). The imperative
//! part runs once: drain the queue, persist the merged metadata in a single
//! atomic write, and only then delete files that the new metadata no longer
//! references.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;

use tracing::{debug, info, instrument, warn};

use chaptersync_shared::{
    ChapterRecord, ManifestDocument, Result, Revision, StoreIdentity, StoreMetadata, SyncError,
};
use chaptersync_storage::ChapterStore;

use crate::collapse::collapse_duplicates;
use crate::pipeline::ProgressReporter;

/// Default number of most recent records re-checked alongside new or updated work.
pub const DEFAULT_LOOKBACK: usize = 2;

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// One chapter as the upstream describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEntry {
    pub url: String,
    /// Upstream revision, when the upstream tracks one. The manifest does not.
    pub revision: Option<Revision>,
    pub title: Option<String>,
    /// Upstream content file the entry lives in, when the upstream is a store.
    pub source: Option<String>,
}

/// What a reconciliation is driven by: an identity plus an ordered entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSnapshot {
    pub identity: StoreIdentity,
    pub revision_date: String,
    pub entries: Vec<UpstreamEntry>,
}

impl UpstreamSnapshot {
    /// The manifest as upstream of the raw store.
    pub fn from_manifest(manifest: &ManifestDocument) -> Self {
        Self {
            identity: manifest.identity(),
            revision_date: manifest.revision_date.clone(),
            entries: manifest
                .chapters
                .iter()
                .map(|c| UpstreamEntry {
                    url: c.url.clone(),
                    revision: None,
                    title: Some(c.title.clone()),
                    source: None,
                })
                .collect(),
        }
    }

    /// A store's metadata as upstream of the next store.
    pub fn from_metadata(metadata: &StoreMetadata) -> Self {
        Self {
            identity: metadata.identity(),
            revision_date: metadata.revision_date.clone(),
            entries: metadata
                .chapters
                .iter()
                .map(|c| UpstreamEntry {
                    url: c.url.clone(),
                    revision: Some(c.revision),
                    title: c.title.clone(),
                    source: Some(c.filename.clone()),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Why a chapter was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Upstream has it, downstream does not.
    New,
    /// Upstream holds a newer revision.
    Updated,
    /// One of the most recently revised downstream records, produced again
    /// to pick up edits the upstream revision does not reflect.
    Recheck,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Updated => write!(f, "updated"),
            Self::Recheck => write!(f, "recheck"),
        }
    }
}

/// One unit of work for a [`ChapterSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub kind: ChangeKind,
    pub entry: UpstreamEntry,
    /// The downstream record this item would replace.
    pub previous: Option<ChapterRecord>,
}

/// Output of [`plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Work in drain order: New, then Updated, then Recheck.
    pub queue: Vec<WorkItem>,
    /// Records present on both sides that need no work.
    pub unchanged: usize,
    /// Urls kept downstream although the upstream no longer lists them.
    pub retained: Vec<String>,
}

impl SyncPlan {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.queue.iter().filter(|i| i.kind == kind).count()
    }
}

/// Diff an upstream against a downstream record set.
///
/// `downstream` must hold at most one record per url (see
/// [`collapse_duplicates`]). Upstream entries sharing a url are reduced to
/// the one with the highest revision. The `lookback` most recent downstream
/// records are queued for a re-check only when the diff finds New or Updated
/// work.
pub fn plan(upstream: &UpstreamSnapshot, downstream: &[ChapterRecord], lookback: usize) -> SyncPlan {
    let mut upstream_order: Vec<&UpstreamEntry> = Vec::new();
    let mut upstream_by_url: HashMap<&str, usize> = HashMap::new();
    for entry in &upstream.entries {
        match upstream_by_url.get(entry.url.as_str()) {
            Some(&slot) if entry.revision > upstream_order[slot].revision => {
                upstream_order[slot] = entry;
            }
            Some(_) => {}
            None => {
                upstream_by_url.insert(&entry.url, upstream_order.len());
                upstream_order.push(entry);
            }
        }
    }

    let downstream_by_url: HashMap<&str, &ChapterRecord> =
        downstream.iter().map(|r| (r.url.as_str(), r)).collect();

    let mut new = Vec::new();
    let mut updated = Vec::new();
    let mut in_both = 0;

    for entry in &upstream_order {
        match downstream_by_url.get(entry.url.as_str()) {
            None => new.push(WorkItem {
                kind: ChangeKind::New,
                entry: (*entry).clone(),
                previous: None,
            }),
            Some(record) => {
                in_both += 1;
                if entry.revision.is_some_and(|r| r > record.revision) {
                    updated.push(WorkItem {
                        kind: ChangeKind::Updated,
                        entry: (*entry).clone(),
                        previous: Some((*record).clone()),
                    });
                }
            }
        }
    }

    let lookback = if new.is_empty() && updated.is_empty() { 0 } else { lookback };
    let queued: HashSet<&str> = updated.iter().map(|i| i.entry.url.as_str()).collect();
    let mut candidates: Vec<&ChapterRecord> = downstream
        .iter()
        .filter(|r| upstream_by_url.contains_key(r.url.as_str()))
        .filter(|r| !queued.contains(r.url.as_str()))
        .collect();
    candidates.sort_by(|a, b| b.revision.cmp(&a.revision).then_with(|| a.url.cmp(&b.url)));

    let recheck: Vec<WorkItem> = candidates
        .into_iter()
        .take(lookback)
        .map(|record| {
            let entry = upstream_order[upstream_by_url[record.url.as_str()]];
            WorkItem {
                kind: ChangeKind::Recheck,
                entry: entry.clone(),
                previous: Some(record.clone()),
            }
        })
        .collect();

    let unchanged = in_both - updated.len() - recheck.len();

    let mut retained: Vec<String> = downstream
        .iter()
        .filter(|r| !upstream_by_url.contains_key(r.url.as_str()))
        .map(|r| r.url.clone())
        .collect();
    retained.sort();

    let mut queue = new;
    queue.extend(updated);
    queue.extend(recheck);

    SyncPlan {
        queue,
        unchanged,
        retained,
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Output of [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    /// The record set to persist.
    pub records: Vec<ChapterRecord>,
    /// Records whose content files are no longer referenced.
    pub superseded: Vec<ChapterRecord>,
}

/// Fold produced records into the baseline, keeping the highest revision per url.
///
/// A produced record with a lower revision than the baseline's loses, and
/// its file is reported as superseded.
pub fn merge(baseline: Vec<ChapterRecord>, produced: Vec<ChapterRecord>) -> Merged {
    let mut slot_of: HashMap<String, usize> = baseline
        .iter()
        .enumerate()
        .map(|(i, r)| (r.url.clone(), i))
        .collect();
    let mut records = baseline;
    let mut superseded = Vec::new();

    for record in produced {
        match slot_of.get(&record.url) {
            None => {
                slot_of.insert(record.url.clone(), records.len());
                records.push(record);
            }
            Some(&slot) => {
                let loser = if record.revision >= records[slot].revision {
                    std::mem::replace(&mut records[slot], record)
                } else {
                    record
                };
                if loser.filename != records[slot].filename {
                    superseded.push(loser);
                }
            }
        }
    }

    Merged {
        records,
        superseded,
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A chapter produced for the downstream store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedChapter {
    pub record: ChapterRecord,
    pub content: String,
}

/// Produces the downstream artifact for one queued item.
///
/// Errors for which [`SyncError::is_fatal`] is false skip the item; the
/// next run's diff selects it again.
pub trait ChapterSource {
    fn produce(&self, item: &WorkItem) -> impl Future<Output = Result<ProducedChapter>>;
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a reconciliation run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    FullResync,
    IncrementalUpdate,
    Converged,
    Aborted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::FullResync => "full-resync",
            Self::IncrementalUpdate => "incremental-update",
            Self::Converged => "converged",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Which store a run reconciles. Used for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Processed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Processed => write!(f, "processed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub stage: Stage,
    /// How many of the most recently revised records to re-check.
    pub lookback: usize,
}

impl ReconcileOptions {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }
}

/// Result of a converged run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub stage: Stage,
    pub state: SyncState,
    /// Whether the run started with a full resync.
    pub full_resync: bool,
    /// Whether the metadata document was rewritten.
    pub persisted: bool,
    /// The store's metadata after the run.
    pub metadata: StoreMetadata,
    pub new: usize,
    pub updated: usize,
    pub rechecked: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Content files deleted (collapsed duplicates and superseded versions).
    pub evicted: usize,
    /// Records kept although the upstream no longer lists them.
    pub retained: usize,
}

impl SyncReport {
    /// Items successfully produced this run.
    pub fn produced(&self) -> usize {
        self.new + self.updated + self.rechecked
    }
}

fn transition(stage: Stage, state: &mut SyncState, next: SyncState) {
    debug!(%stage, from = %state, to = %next, "state transition");
    *state = next;
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Reconcile `store` against `upstream`, producing queued chapters through `source`.
///
/// On `Err` the run is aborted: the metadata document was not written and
/// content files written during the run that the pre-run metadata did not
/// reference have been removed on a best-effort basis.
#[instrument(skip_all, fields(stage = %opts.stage, store = %store))]
pub async fn reconcile<S: ChapterSource>(
    upstream: &UpstreamSnapshot,
    store: &ChapterStore,
    source: &S,
    opts: &ReconcileOptions,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    let stage = opts.stage;
    let mut state = SyncState::Uninitialized;

    // --- Choose the baseline ---
    let verdict = match store.check(Some(&upstream.identity)) {
        Ok(verdict) => verdict,
        Err(e) => return Err(abort(stage, &mut state, store, &BTreeSet::new(), &[], e)),
    };
    let (baseline, full_resync) = match verdict {
        Ok(metadata) => {
            transition(stage, &mut state, SyncState::IncrementalUpdate);
            (metadata, false)
        }
        Err(issue) => {
            warn!(%stage, %issue, "store invalid, starting full resync");
            transition(stage, &mut state, SyncState::FullResync);
            store.wipe()?;
            transition(stage, &mut state, SyncState::IncrementalUpdate);
            let empty = StoreMetadata::empty(&upstream.identity, &upstream.revision_date);
            (empty, true)
        }
    };
    let pre_run_files: BTreeSet<String> =
        baseline.chapters.iter().map(|c| c.filename.clone()).collect();

    // --- Diff ---
    let collapsed = collapse_duplicates(baseline.chapters.clone());
    let sync_plan = plan(upstream, &collapsed.kept, opts.lookback);

    info!(
        %stage,
        new = sync_plan.count(ChangeKind::New),
        updated = sync_plan.count(ChangeKind::Updated),
        recheck = sync_plan.count(ChangeKind::Recheck),
        unchanged = sync_plan.unchanged,
        retained = sync_plan.retained.len(),
        duplicates = collapsed.evicted.len(),
        "sync plan computed"
    );

    if sync_plan.queue.is_empty() && collapsed.evicted.is_empty() && !full_resync {
        transition(stage, &mut state, SyncState::Converged);
        info!(%stage, "store already converged");
        return Ok(SyncReport {
            stage,
            state,
            full_resync,
            persisted: false,
            metadata: baseline,
            new: 0,
            updated: 0,
            rechecked: 0,
            unchanged: sync_plan.unchanged,
            skipped: 0,
            evicted: 0,
            retained: sync_plan.retained.len(),
        });
    }

    // --- Drain the queue ---
    let total = sync_plan.queue.len();
    let mut produced: Vec<ChapterRecord> = Vec::new();
    let mut written: Vec<String> = Vec::new();
    let mut counts: HashMap<ChangeKind, usize> = HashMap::new();
    let mut skipped = 0;

    for (i, item) in sync_plan.queue.iter().enumerate() {
        let label = item.entry.title.as_deref().unwrap_or(&item.entry.url);

        let chapter = match source.produce(item).await {
            Ok(chapter) => chapter,
            Err(e) if e.is_fatal() => {
                return Err(abort(stage, &mut state, store, &pre_run_files, &written, e));
            }
            Err(e) => {
                warn!(%stage, url = %item.entry.url, kind = %item.kind, error = %e, "skipping chapter");
                progress.record_skipped(label, &e.to_string(), i + 1, total);
                skipped += 1;
                continue;
            }
        };

        if let Err(e) = store.write_content(&chapter.record.filename, &chapter.content) {
            return Err(abort(stage, &mut state, store, &pre_run_files, &written, e));
        }
        written.push(chapter.record.filename.clone());

        debug!(
            %stage,
            url = %chapter.record.url,
            kind = %item.kind,
            revision = %chapter.record.revision,
            file = %chapter.record.filename,
            "chapter produced"
        );
        progress.record_done(label, i + 1, total);
        *counts.entry(item.kind).or_default() += 1;
        produced.push(chapter.record);
    }

    // --- Persist ---
    let merged = merge(collapsed.kept, produced);
    let mut metadata = StoreMetadata::empty(&upstream.identity, &upstream.revision_date);
    metadata.chapters = merged.records;
    metadata.canonicalize();

    if let Err(e) = store.save_metadata(&metadata) {
        return Err(abort(stage, &mut state, store, &pre_run_files, &written, e));
    }
    transition(stage, &mut state, SyncState::Converged);

    // --- Evict unreferenced files ---
    let referenced = metadata.filenames();
    let stale: BTreeSet<&str> = collapsed
        .evicted
        .iter()
        .chain(merged.superseded.iter())
        .map(|r| r.filename.as_str())
        .filter(|name| !referenced.contains(name))
        .collect();

    let mut evicted = 0;
    for name in stale {
        match store.remove_content(name) {
            Ok(true) => evicted += 1,
            Ok(false) => {}
            Err(e) => warn!(%stage, file = %name, error = %e, "failed to remove stale content file"),
        }
    }

    let report = SyncReport {
        stage,
        state,
        full_resync,
        persisted: true,
        new: counts.get(&ChangeKind::New).copied().unwrap_or(0),
        updated: counts.get(&ChangeKind::Updated).copied().unwrap_or(0),
        rechecked: counts.get(&ChangeKind::Recheck).copied().unwrap_or(0),
        unchanged: sync_plan.unchanged,
        skipped,
        evicted,
        retained: sync_plan.retained.len(),
        metadata,
    };

    info!(
        %stage,
        new = report.new,
        updated = report.updated,
        rechecked = report.rechecked,
        unchanged = report.unchanged,
        skipped = report.skipped,
        evicted = report.evicted,
        retained = report.retained,
        chapters = report.metadata.chapters.len(),
        "store converged"
    );
    Ok(report)
}

/// Move to `Aborted`, remove files this run added, and hand back the cause.
fn abort(
    stage: Stage,
    state: &mut SyncState,
    store: &ChapterStore,
    pre_run_files: &BTreeSet<String>,
    written: &[String],
    cause: SyncError,
) -> SyncError {
    transition(stage, state, SyncState::Aborted);
    warn!(%stage, error = %cause, "reconciliation aborted, metadata left untouched");

    for name in written.iter().filter(|n| !pre_run_files.contains(*n)) {
        if let Err(e) = store.remove_content(name) {
            warn!(%stage, file = %name, error = %e, "failed to clean up partial output");
        }
    }
    cause
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
