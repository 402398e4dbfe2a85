//! File-backed chapter store: one metadata document plus one content file per chapter.
//!
//! A [`ChapterStore`] owns a directory. Inside it live `metadata.json` (a
//! [`StoreMetadata`]) and one `*.md` file per referenced chapter. Nothing
//! else in the directory is considered part of the store.
//!
//! **Access rules:**
//! - reconciliation: read-write (sole writer) via [`ChapterStore::open`]
//! - inspection (`validate`, export): read-only via [`ChapterStore::open_readonly`]
//!
//! Every write goes to a dot-prefixed temp file first and is renamed into
//! place, so a crash never leaves a half-written metadata or content file.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use chaptersync_shared::{Result, StoreIdentity, StoreMetadata, SyncError};

/// Name of the metadata document inside a store directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Extension of chapter content files.
const CONTENT_EXT: &str = "md";

// ---------------------------------------------------------------------------
// Validation issues
// ---------------------------------------------------------------------------

/// Why a store failed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("metadata file not found")]
    MissingMetadata,

    #[error("metadata file is empty")]
    EmptyMetadata,

    #[error("metadata file is malformed: {0}")]
    MalformedMetadata(String),

    #[error("store was built from {found}, upstream is {expected}")]
    IdentityMismatch {
        expected: StoreIdentity,
        found: StoreIdentity,
    },

    #[error("content files referenced by metadata are missing: {}", join(.0))]
    MissingFiles(Vec<String>),

    #[error("content files not referenced by metadata: {}", join(.0))]
    OrphanFiles(Vec<String>),
}

fn join(names: &[String]) -> String {
    names.join(", ")
}

impl From<ValidationIssue> for SyncError {
    fn from(issue: ValidationIssue) -> Self {
        match issue {
            ValidationIssue::IdentityMismatch { expected, found } => {
                SyncError::IdentityMismatch { expected, found }
            }
            other => SyncError::validation(other.to_string()),
        }
    }
}

/// Outcome of an integrity check that could read the store.
pub type Verdict = std::result::Result<StoreMetadata, ValidationIssue>;

// ---------------------------------------------------------------------------
// ChapterStore
// ---------------------------------------------------------------------------

/// Handle on one store directory.
#[derive(Debug, Clone)]
pub struct ChapterStore {
    root: PathBuf,
    readonly: bool,
}

impl fmt::Display for ChapterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

impl ChapterStore {
    /// Open or create the store at `root` in read-write mode.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| SyncError::io(&root, e))?;
        Ok(Self {
            root,
            readonly: false,
        })
    }

    /// Open the store at `root` for inspection only. The directory may not exist.
    pub fn open_readonly(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn content_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata_path().is_file()
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SyncError::io(
                &self.root,
                std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "store is opened in read-only mode",
                ),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Load and validate the metadata document.
    ///
    /// I/O failures are fatal ([`SyncError::Io`]); a document that cannot be
    /// interpreted is a [`SyncError::Validation`].
    pub fn load_metadata(&self) -> Result<StoreMetadata> {
        let path = self.metadata_path();
        let content = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        parse_metadata(&content).map_err(SyncError::from)
    }

    /// Persist `metadata` atomically, in canonical chapter order.
    pub fn save_metadata(&self, metadata: &StoreMetadata) -> Result<()> {
        self.check_writable()?;
        let mut canonical = metadata.clone();
        canonical.canonicalize();

        let json = serde_json::to_string_pretty(&canonical)
            .map_err(|e| SyncError::validation(format!("JSON serialization failed: {e}")))?;
        self.write_atomic(METADATA_FILE, json.as_bytes())?;

        debug!(
            store = %self,
            chapters = canonical.chapters.len(),
            "metadata written"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content files
    // -----------------------------------------------------------------------

    /// Names of every content file currently on disk.
    pub fn content_files(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        if !self.root.exists() {
            return Ok(names);
        }

        let entries = std::fs::read_dir(&self.root).map_err(|e| SyncError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_content_file(name) {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn read_content(&self, filename: &str) -> Result<String> {
        let path = self.content_path(filename);
        std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))
    }

    /// Write a content file atomically, replacing any previous version.
    pub fn write_content(&self, filename: &str, text: &str) -> Result<()> {
        self.check_writable()?;
        self.write_atomic(filename, text.as_bytes())?;
        debug!(store = %self, file = %filename, bytes = text.len(), "wrote content file");
        Ok(())
    }

    /// Remove a content file. Returns `false` if it was already gone.
    pub fn remove_content(&self, filename: &str) -> Result<bool> {
        self.check_writable()?;
        let path = self.content_path(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(store = %self, file = %filename, "removed content file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::io(&path, e)),
        }
    }

    /// Delete every content file, the metadata document and stray temp files.
    ///
    /// Returns the number of content files removed.
    pub fn wipe(&self) -> Result<usize> {
        self.check_writable()?;
        let mut removed = 0;

        let entries = std::fs::read_dir(&self.root).map_err(|e| SyncError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let owned = is_content_file(name) || name == METADATA_FILE || is_temp_file(name);
            if !owned {
                continue;
            }
            std::fs::remove_file(&path).map_err(|e| SyncError::io(&path, e))?;
            if is_content_file(name) {
                removed += 1;
            }
        }

        info!(store = %self, removed, "store wiped");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Check the store's integrity without touching it.
    ///
    /// The outer `Result` carries I/O failures: a metadata document or
    /// directory that exists but cannot be read is [`SyncError::Io`], never
    /// a verdict. The inner [`Verdict`] holds the loaded metadata, or the
    /// issue when the metadata is missing, empty or malformed, when its
    /// identity differs from `expected`, or when the content files on disk
    /// are not exactly the ones the metadata references (in either direction).
    pub fn check(&self, expected: Option<&StoreIdentity>) -> Result<Verdict> {
        let path = self.metadata_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Err(ValidationIssue::MissingMetadata));
            }
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        let metadata = match parse_metadata(&content) {
            Ok(metadata) => metadata,
            Err(issue) => return Ok(Err(issue)),
        };

        if let Some(expected) = expected {
            let found = metadata.identity();
            if &found != expected {
                return Ok(Err(ValidationIssue::IdentityMismatch {
                    expected: expected.clone(),
                    found,
                }));
            }
        }

        let on_disk = self.content_files()?;
        let referenced = metadata.filenames();

        let missing: Vec<String> = referenced
            .iter()
            .filter(|name| !on_disk.contains(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Ok(Err(ValidationIssue::MissingFiles(missing)));
        }

        let orphans: Vec<String> = on_disk
            .iter()
            .filter(|name| !referenced.contains(name.as_str()))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            return Ok(Err(ValidationIssue::OrphanFiles(orphans)));
        }

        Ok(Ok(metadata))
    }

    /// Boolean form of [`check`](Self::check), logging the reason on failure.
    pub fn validate(&self, expected: Option<&StoreIdentity>) -> bool {
        match self.check(expected) {
            Ok(Ok(_)) => true,
            Ok(Err(issue)) => {
                warn!(store = %self, %issue, "store failed integrity check");
                false
            }
            Err(e) => {
                warn!(store = %self, error = %e, "store could not be read");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn write_atomic(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let target = self.root.join(filename);
        let temp = self.root.join(format!(".{filename}.tmp"));

        std::fs::write(&temp, bytes).map_err(|e| SyncError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            SyncError::io(&target, e)
        })
    }
}

fn parse_metadata(content: &str) -> std::result::Result<StoreMetadata, ValidationIssue> {
    if content.trim().is_empty() {
        return Err(ValidationIssue::EmptyMetadata);
    }
    serde_json::from_str(content).map_err(|e| ValidationIssue::MalformedMetadata(e.to_string()))
}

fn is_content_file(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == CONTENT_EXT)
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chaptersync_shared::{ChapterRecord, Revision};

    fn temp_store() -> ChapterStore {
        let dir = std::env::temp_dir().join(format!("cs-storage-test-{}", uuid::Uuid::now_v7()));
        ChapterStore::open(dir).expect("open store")
    }

    fn identity() -> StoreIdentity {
        StoreIdentity::new("HFY", "series/test", "Test Story")
    }

    fn record(url: &str, filename: &str, rev: i64) -> ChapterRecord {
        ChapterRecord {
            url: url.into(),
            filename: filename.into(),
            title: None,
            revision: Revision(rev),
        }
    }

    fn populated_store() -> ChapterStore {
        let store = temp_store();
        let mut meta = StoreMetadata::empty(&identity(), "2024-05-01");
        meta.chapters = vec![record("u/a", "10 - a - [A].md", 10), record("u/b", "5 - b - [B].md", 5)];
        for c in &meta.chapters {
            store.write_content(&c.filename, "text").unwrap();
        }
        store.save_metadata(&meta).unwrap();
        store
    }

    #[test]
    fn consistent_store_validates() {
        let store = populated_store();
        assert!(store.validate(Some(&identity())));
        assert!(store.validate(None));
        let meta = store.check(None).unwrap().unwrap();
        assert_eq!(meta.chapters.len(), 2);
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn empty_store_with_metadata_validates() {
        let store = temp_store();
        store
            .save_metadata(&StoreMetadata::empty(&identity(), "2024-05-01"))
            .unwrap();
        assert!(store.validate(Some(&identity())));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn missing_metadata_fails() {
        let store = temp_store();
        assert_eq!(store.check(None).unwrap().unwrap_err(), ValidationIssue::MissingMetadata);
        assert!(!store.validate(None));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn empty_or_garbage_metadata_fails() {
        let store = temp_store();
        std::fs::write(store.metadata_path(), "  \n").unwrap();
        assert_eq!(store.check(None).unwrap().unwrap_err(), ValidationIssue::EmptyMetadata);

        std::fs::write(store.metadata_path(), "{\"subreddit\": 3").unwrap();
        assert!(matches!(
            store.check(None).unwrap().unwrap_err(),
            ValidationIssue::MalformedMetadata(_)
        ));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn record_missing_required_field_fails() {
        let store = temp_store();
        let doc = r#"{"subreddit":"HFY","wiki_uri":"x","wiki_section":"X","revision_date":"d",
            "chapters":[{"url":"u/a","revision_date":1}]}"#;
        std::fs::write(store.metadata_path(), doc).unwrap();
        assert!(matches!(
            store.check(None).unwrap().unwrap_err(),
            ValidationIssue::MalformedMetadata(_)
        ));
        assert!(matches!(
            store.load_metadata().unwrap_err(),
            SyncError::Validation { .. }
        ));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn identity_mismatch_fails() {
        let store = populated_store();
        let other = StoreIdentity::new("HFY", "series/other", "Other");
        let issue = store.check(Some(&other)).unwrap().unwrap_err();
        assert!(matches!(issue, ValidationIssue::IdentityMismatch { .. }));
        assert!(matches!(
            SyncError::from(issue),
            SyncError::IdentityMismatch { .. }
        ));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn missing_referenced_file_fails() {
        let store = populated_store();
        store.remove_content("5 - b - [B].md").unwrap();
        assert_eq!(
            store.check(None).unwrap().unwrap_err(),
            ValidationIssue::MissingFiles(vec!["5 - b - [B].md".into()])
        );
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn orphan_file_fails() {
        let store = populated_store();
        store.write_content("99 - z - [Z].md", "stray").unwrap();
        assert_eq!(
            store.check(None).unwrap().unwrap_err(),
            ValidationIssue::OrphanFiles(vec!["99 - z - [Z].md".into()])
        );
        assert!(!store.validate(None));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn unreadable_metadata_is_an_io_error() {
        let store = temp_store();
        store.write_content("10 - a - [A].md", "keep").unwrap();
        std::fs::create_dir(store.metadata_path()).unwrap();

        let err = store.check(Some(&identity())).unwrap_err();
        assert!(err.is_fatal());
        assert!(!store.validate(None));
        assert!(store.content_path("10 - a - [A].md").exists());
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn non_content_files_are_ignored() {
        let store = populated_store();
        std::fs::write(store.root().join("cover.jpg"), b"img").unwrap();
        std::fs::write(store.root().join(".partial.md.tmp"), b"x").unwrap();
        assert!(store.validate(None));
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn metadata_is_written_in_canonical_order() {
        let store = temp_store();
        let mut meta = StoreMetadata::empty(&identity(), "d");
        meta.chapters = vec![record("u/b", "b.md", 9), record("u/a", "a.md", 3)];
        store.save_metadata(&meta).unwrap();
        let first = std::fs::read(store.metadata_path()).unwrap();

        meta.chapters.reverse();
        store.save_metadata(&meta).unwrap();
        let second = std::fs::read(store.metadata_path()).unwrap();

        assert_eq!(first, second);
        let loaded = store.load_metadata().unwrap();
        assert_eq!(loaded.chapters[0].url, "u/a");
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn atomic_writes_leave_no_temp_files() {
        let store = populated_store();
        for entry in std::fs::read_dir(store.root()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn wipe_removes_store_files_only() {
        let store = populated_store();
        std::fs::write(store.root().join("notes.txt"), b"keep").unwrap();
        let removed = store.wipe().unwrap();
        assert_eq!(removed, 2);
        assert!(!store.has_metadata());
        assert!(store.content_files().unwrap().is_empty());
        assert!(store.root().join("notes.txt").exists());
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn remove_missing_content_is_not_an_error() {
        let store = temp_store();
        assert!(!store.remove_content("nope.md").unwrap());
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn readonly_rejects_writes() {
        let rw = populated_store();
        let ro = ChapterStore::open_readonly(rw.root());
        assert!(ro.validate(None));
        let err = ro.write_content("x.md", "x").unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.wipe().is_err());
        let _ = std::fs::remove_dir_all(rw.root());
    }
}
