//! Core domain types: revisions, chapter records and the documents that hold them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// Comparable version marker of a chapter: unix time in whole seconds.
///
/// A chapter's revision is the creation time of the newest piece of text
/// that makes it up, so it only ever moves forward when the author adds to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub i64);

impl Revision {
    /// Build a revision from a fractional unix timestamp, as the remote API reports them.
    pub fn from_unix_f64(secs: f64) -> Self {
        Self(secs.trunc() as i64)
    }

    /// The revision as a UTC timestamp, if it is in chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }

    /// Format the revision with a `strftime` pattern, falling back to the raw number.
    pub fn format(self, pattern: &str) -> String {
        match self.to_datetime() {
            Some(dt) => dt.format(pattern).to_string(),
            None => self.0.to_string(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoreIdentity
// ---------------------------------------------------------------------------

/// The upstream a store was built from. Two stores with different identities
/// never share records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreIdentity {
    pub subreddit: String,
    pub wiki_uri: String,
    pub wiki_section: String,
}

impl StoreIdentity {
    pub fn new(
        subreddit: impl Into<String>,
        wiki_uri: impl Into<String>,
        wiki_section: impl Into<String>,
    ) -> Self {
        Self {
            subreddit: subreddit.into(),
            wiki_uri: wiki_uri.into(),
            wiki_section: wiki_section.into(),
        }
    }
}

impl fmt::Display for StoreIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r/{}/wiki/{} [{}]",
            self.subreddit, self.wiki_uri, self.wiki_section
        )
    }
}

// ---------------------------------------------------------------------------
// ChapterRecord
// ---------------------------------------------------------------------------

/// One chapter as a store knows it.
///
/// `url` is the identity key. `filename` names the content file inside the
/// owning store and is derived from `(revision, id, title)` by
/// [`chapter_filename`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChapterRecordRepr")]
pub struct ChapterRecord {
    /// Stable identity of the chapter (the submission URL from the manifest).
    pub url: String,
    /// Content file name inside the owning store.
    pub filename: String,
    /// Chapter title as published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Revision of the content the file holds.
    #[serde(rename = "revision_date")]
    pub revision: Revision,
}

/// Wire shape of a [`ChapterRecord`], checked before it becomes one.
#[derive(Deserialize)]
struct ChapterRecordRepr {
    url: String,
    filename: String,
    #[serde(default)]
    title: Option<String>,
    revision_date: Revision,
}

impl TryFrom<ChapterRecordRepr> for ChapterRecord {
    type Error = String;

    fn try_from(repr: ChapterRecordRepr) -> std::result::Result<Self, Self::Error> {
        if repr.url.trim().is_empty() {
            return Err("chapter record has an empty url".into());
        }
        if !is_bare_filename(&repr.filename) {
            return Err(format!(
                "chapter record for {} has an invalid filename {:?}",
                repr.url, repr.filename
            ));
        }
        Ok(Self {
            url: repr.url,
            filename: repr.filename,
            title: repr.title,
            revision: repr.revision_date,
        })
    }
}

fn is_bare_filename(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Longest content file name, in bytes.
///
/// Leaves room for the `.{name}.tmp` wrapper of an atomic write within the
/// usual 255-byte file name limit.
pub const MAX_FILENAME_BYTES: usize = 250;

/// Derive the content file name of a chapter.
///
/// The revision leads so that a directory listing sorts chronologically; the
/// remote id makes collisions between distinct chapters impossible. Long titles
/// are cut to keep the name within [`MAX_FILENAME_BYTES`].
pub fn chapter_filename(revision: Revision, id: &str, title: &str) -> String {
    let head = format!("{revision} - {id} - [");
    let budget = MAX_FILENAME_BYTES.saturating_sub(head.len() + "].md".len());
    let title = sanitize_title(title);
    let title = truncate_on_char_boundary(&title, budget).trim_end();
    format!("{head}{title}].md")
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Make a title safe to embed in a file name.
pub fn sanitize_title(title: &str) -> String {
    title.trim().replace(['/', '\\'], "-")
}

// ---------------------------------------------------------------------------
// ManifestDocument
// ---------------------------------------------------------------------------

/// One entry of the upstream chapter listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub url: String,
    pub title: String,
}

/// Immutable snapshot of the upstream chapter listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub subreddit: String,
    pub wiki_uri: String,
    pub wiki_section: String,
    /// Date of the wiki revision the snapshot was taken from (`YYYY-MM-DD`).
    pub revision_date: String,
    /// Last editor of the wiki page, used as the story's author on export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Chapters in listing order.
    pub chapters: Vec<ManifestChapter>,
}

impl ManifestDocument {
    pub fn identity(&self) -> StoreIdentity {
        StoreIdentity::new(&self.subreddit, &self.wiki_uri, &self.wiki_section)
    }
}

// ---------------------------------------------------------------------------
// StoreMetadata
// ---------------------------------------------------------------------------

/// The `metadata.json` document of a raw or processed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub subreddit: String,
    pub wiki_uri: String,
    pub wiki_section: String,
    pub revision_date: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
}

impl StoreMetadata {
    /// Fresh metadata for a store built from `identity`.
    pub fn empty(identity: &StoreIdentity, revision_date: impl Into<String>) -> Self {
        Self {
            subreddit: identity.subreddit.clone(),
            wiki_uri: identity.wiki_uri.clone(),
            wiki_section: identity.wiki_section.clone(),
            revision_date: revision_date.into(),
            chapters: Vec::new(),
        }
    }

    pub fn identity(&self) -> StoreIdentity {
        StoreIdentity::new(&self.subreddit, &self.wiki_uri, &self.wiki_section)
    }

    /// Every content file name the metadata references.
    pub fn filenames(&self) -> BTreeSet<&str> {
        self.chapters.iter().map(|c| c.filename.as_str()).collect()
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&ChapterRecord> {
        self.chapters.iter().find(|c| c.filename == filename)
    }

    pub fn find_by_url(&self, url: &str) -> Option<&ChapterRecord> {
        self.chapters.iter().find(|c| c.url == url)
    }

    /// Sort chapters into the persisted order: revision, then url.
    ///
    /// Identical record sets therefore serialize to identical bytes.
    pub fn canonicalize(&mut self) {
        self.chapters.sort_by(|a, b| {
            a.revision
                .cmp(&b.revision)
                .then_with(|| a.url.cmp(&b.url))
                .then_with(|| a.filename.cmp(&b.filename))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, rev: i64) -> ChapterRecord {
        ChapterRecord {
            url: url.into(),
            filename: chapter_filename(Revision(rev), "abc", url),
            title: Some(url.into()),
            revision: Revision(rev),
        }
    }

    #[test]
    fn filename_is_deterministic_and_sanitized() {
        let name = chapter_filename(Revision(1700000000), "17x2ab", " Chapter 3/4: Back\\Forth ");
        assert_eq!(name, "1700000000 - 17x2ab - [Chapter 3-4: Back-Forth].md");
        assert_eq!(
            name,
            chapter_filename(Revision(1700000000), "17x2ab", " Chapter 3/4: Back\\Forth ")
        );
    }

    #[test]
    fn long_titles_are_cut_to_fit_a_file_name() {
        let title = "x".repeat(300);
        let name = chapter_filename(Revision(1700000000), "abc123", &title);
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.starts_with("1700000000 - abc123 - [xxx"));
        assert!(name.ends_with("x].md"));
        assert!(format!(".{name}.tmp").len() <= 255);

        let title = "é".repeat(300);
        let name = chapter_filename(Revision(1700000000), "abc123", &title);
        assert!(name.len() <= MAX_FILENAME_BYTES);
        assert!(name.ends_with("é].md"));

        let short = chapter_filename(Revision(1), "id", "Chapter 1");
        assert_eq!(short, "1 - id - [Chapter 1].md");
    }

    #[test]
    fn record_serializes_revision_as_revision_date() {
        let json = serde_json::to_value(record("https://r/a", 10)).expect("serialize");
        assert_eq!(json["revision_date"], 10);
        assert!(json.get("revision").is_none());
    }

    #[test]
    fn record_without_title_roundtrips() {
        let json = r#"{"url":"https://r/a","filename":"10 - a - [A].md","revision_date":10}"#;
        let rec: ChapterRecord = serde_json::from_str(json).expect("deserialize");
        assert_eq!(rec.title, None);
        assert_eq!(rec.revision, Revision(10));
        let back = serde_json::to_string(&rec).expect("serialize");
        assert!(!back.contains("title"));
    }

    #[test]
    fn record_missing_filename_is_rejected() {
        let json = r#"{"url":"https://r/a","revision_date":10}"#;
        assert!(serde_json::from_str::<ChapterRecord>(json).is_err());
    }

    #[test]
    fn record_with_path_in_filename_is_rejected() {
        let json = r#"{"url":"https://r/a","filename":"../escape.md","revision_date":10}"#;
        let err = serde_json::from_str::<ChapterRecord>(json).unwrap_err();
        assert!(err.to_string().contains("invalid filename"));
    }

    #[test]
    fn record_with_empty_url_is_rejected() {
        let json = r#"{"url":"  ","filename":"a.md","revision_date":10}"#;
        assert!(serde_json::from_str::<ChapterRecord>(json).is_err());
    }

    #[test]
    fn canonical_order_is_revision_then_url() {
        let identity = StoreIdentity::new("HFY", "series/x", "X");
        let mut meta = StoreMetadata::empty(&identity, "2024-01-01");
        meta.chapters = vec![record("b", 5), record("a", 9), record("a", 5)];
        meta.canonicalize();
        let order: Vec<(&str, i64)> = meta
            .chapters
            .iter()
            .map(|c| (c.url.as_str(), c.revision.0))
            .collect();
        assert_eq!(order, vec![("a", 5), ("b", 5), ("a", 9)]);
    }

    #[test]
    fn revision_formats_as_date() {
        assert_eq!(Revision(0).format("%Y-%m-%d %A"), "1970-01-01 Thursday");
        assert_eq!(Revision::from_unix_f64(1.9), Revision(1));
    }

    #[test]
    fn metadata_identity_matches_manifest_identity() {
        let manifest = ManifestDocument {
            subreddit: "HFY".into(),
            wiki_uri: "series/x".into(),
            wiki_section: "X".into(),
            revision_date: "2024-01-01".into(),
            author: None,
            chapters: vec![],
        };
        let meta = StoreMetadata::empty(&manifest.identity(), &manifest.revision_date);
        assert_eq!(meta.identity(), manifest.identity());
        assert!(meta.filenames().is_empty());
    }
}
