//! Manifest fetching: turns a story's wiki page into a [`ManifestDocument`].
//!
//! The manifest is the upstream of the raw store. Each fetch produces an
//! immutable snapshot which is also written to the project's `wiki/`
//! directory, so later stages (and offline runs) can use the newest one
//! without talking to the network.

mod parser;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use chaptersync_shared::{
    ManifestDocument, ProjectConfig, RedditConfig, Result, Revision, StoreIdentity, SyncError,
};

pub use parser::{parse_section, sanitize_link_text};

/// Maximum number of redirects to follow when fetching the wiki page.
const MAX_REDIRECTS: usize = 3;

/// Extension of snapshot files.
const SNAPSHOT_EXT: &str = "json";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WikiListing {
    data: WikiPage,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    content_md: String,
    revision_date: f64,
    #[serde(default)]
    revision_by: Option<WikiUser>,
}

#[derive(Debug, Deserialize)]
struct WikiUser {
    data: WikiUserData,
}

#[derive(Debug, Deserialize)]
struct WikiUserData {
    name: String,
}

// ---------------------------------------------------------------------------
// ManifestFetcher
// ---------------------------------------------------------------------------

/// Fetches wiki pages through the public reddit JSON API.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: Client,
    api_base: String,
}

impl ManifestFetcher {
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the project's wiki page and extract its chapter listing.
    #[instrument(skip_all, fields(subreddit = %project.subreddit, wiki_uri = %project.wiki_uri))]
    pub async fn fetch(&self, project: &ProjectConfig) -> Result<ManifestDocument> {
        let url = format!(
            "{}/r/{}/wiki/{}.json",
            self.api_base, project.subreddit, project.wiki_uri
        );
        debug!(%url, "fetching wiki page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(format!("{url}: failed to read body: {e}")))?;

        let document = build_document(project, &body)?;
        info!(
            chapters = document.chapters.len(),
            revision_date = %document.revision_date,
            "manifest fetched"
        );
        Ok(document)
    }
}

/// Interpret a wiki page response body for `project`.
fn build_document(project: &ProjectConfig, body: &str) -> Result<ManifestDocument> {
    let listing: WikiListing = serde_json::from_str(body)
        .map_err(|e| SyncError::parse(format!("unexpected wiki page response: {e}")))?;
    let page = listing.data;

    let chapters = parse_section(&page.content_md, &project.wiki_section)?;
    let revision_date = Revision::from_unix_f64(page.revision_date).format("%Y-%m-%d");

    Ok(ManifestDocument {
        subreddit: project.subreddit.clone(),
        wiki_uri: project.wiki_uri.clone(),
        wiki_section: project.wiki_section.clone(),
        revision_date,
        author: page.revision_by.map(|u| u.data.name),
        chapters,
    })
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// File name prefix shared by every snapshot of one identity.
fn snapshot_prefix(identity: &StoreIdentity) -> String {
    format!(
        "wiki_{}_[{}]_",
        identity.subreddit,
        sanitize_link_text(&identity.wiki_section)
    )
}

/// Path a snapshot of `document` is written to inside `dir`.
pub fn snapshot_path(dir: &Path, document: &ManifestDocument) -> PathBuf {
    dir.join(format!(
        "{}{}.{SNAPSHOT_EXT}",
        snapshot_prefix(&document.identity()),
        document.revision_date
    ))
}

/// Persist `document` into `dir`, replacing a snapshot of the same wiki revision.
pub fn save_snapshot(dir: &Path, document: &ManifestDocument) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

    let path = snapshot_path(dir, document);
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| SyncError::parse(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot.json");
    let temp = dir.join(format!(".{file_name}.tmp"));
    std::fs::write(&temp, json).map_err(|e| SyncError::io(&temp, e))?;
    std::fs::rename(&temp, &path).map_err(|e| SyncError::io(&path, e))?;

    debug!(path = %path.display(), "manifest snapshot written");
    Ok(path)
}

/// Load the newest snapshot of `identity` in `dir`, by modification time.
///
/// Returns `None` when no snapshot exists. A snapshot that cannot be parsed
/// is skipped with a warning.
pub fn load_latest(dir: &Path, identity: &StoreIdentity) -> Result<Option<ManifestDocument>> {
    if !dir.exists() {
        return Ok(None);
    }

    let prefix = snapshot_prefix(identity);
    let mut candidates: Vec<(SystemTime, String, PathBuf)> = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::io(dir, e))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) || !name.ends_with(&format!(".{SNAPSHOT_EXT}")) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| SyncError::io(&path, e))?;
        candidates.push((modified, name.to_string(), path));
    }

    // Newest first; the date in the name breaks mtime ties.
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    for (_, _, path) in candidates {
        let content = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        match serde_json::from_str::<ManifestDocument>(&content) {
            Ok(document) if document.identity() == *identity => return Ok(Some(document)),
            Ok(_) => warn!(path = %path.display(), "snapshot identity differs, skipping"),
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable snapshot, skipping"),
        }
    }
    Ok(None)
}
