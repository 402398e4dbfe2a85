//! Export: merge the processed store into one deliverable document.
//!
//! Writes a single Markdown file with a YAML front matter block:
//!
//! ```text
//! <output_dir>/
//! ├── {title} - {author}.md     (always)
//! └── {title} - {author}.epub   (when pandoc is enabled)
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use chaptersync_shared::{ExportConfig, ManifestDocument, Result, StoreMetadata, SyncError};
use chaptersync_storage::ChapterStore;

/// Name of the optional cover image inside a project's `wiki/` directory.
pub const COVER_IMAGE: &str = "cover.jpg";

/// Author used when the manifest names none.
const UNKNOWN_AUTHOR: &str = "Unknown";

/// Options for a single export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Directory the document is written to.
    pub output_dir: PathBuf,
    /// Directory searched for the cover image.
    pub wiki_dir: PathBuf,
    pub lang: String,
    /// Run pandoc on the Markdown document.
    pub pandoc: bool,
    pub pandoc_cmd: String,
    /// Pandoc output format, used as the file extension.
    pub format: String,
}

impl ExportOptions {
    pub fn from_config(config: &ExportConfig, output_dir: &Path, wiki_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            wiki_dir: wiki_dir.to_path_buf(),
            lang: config.lang.clone(),
            pandoc: config.pandoc,
            pandoc_cmd: config.pandoc_cmd.clone(),
            format: config.format.clone(),
        }
    }
}

/// Output from a successful export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// The Markdown document.
    pub path: PathBuf,
    /// Hex SHA-256 of the Markdown document.
    pub sha256: String,
    pub bytes: usize,
    pub chapters: usize,
    /// The pandoc output, when pandoc ran.
    pub converted: Option<PathBuf>,
}

/// Merge every chapter of `processed` into one document.
#[instrument(skip_all, fields(store = %processed, title = %manifest.wiki_section))]
pub fn export(
    processed: &ChapterStore,
    manifest: &ManifestDocument,
    opts: &ExportOptions,
) -> Result<ExportResult> {
    let mut metadata = processed.load_metadata()?;
    if metadata.chapters.is_empty() {
        return Err(SyncError::Export("processed store holds no chapters".into()));
    }
    metadata.canonicalize();

    let author = manifest.author.as_deref().unwrap_or(UNKNOWN_AUTHOR);
    let cover = opts.wiki_dir.join(COVER_IMAGE);
    let cover = cover.is_file().then_some(cover);

    let mut document = build_frontmatter(&metadata, manifest, author, &opts.lang, cover.as_deref());
    for chapter in &metadata.chapters {
        let text = processed.read_content(&chapter.filename)?;
        document.push_str(text.trim());
        document.push_str("\n\n");
    }

    std::fs::create_dir_all(&opts.output_dir).map_err(|e| SyncError::io(&opts.output_dir, e))?;
    let stem = sanitize_file_stem(&format!("{} - {author}", manifest.wiki_section));
    let path = opts.output_dir.join(format!("{stem}.md"));
    write_atomic(&path, document.as_bytes())?;

    let sha256 = format!("{:x}", Sha256::digest(document.as_bytes()));
    info!(
        path = %path.display(),
        chapters = metadata.chapters.len(),
        bytes = document.len(),
        %sha256,
        "document written"
    );

    let converted = if opts.pandoc {
        let target = opts.output_dir.join(format!("{stem}.{}", opts.format));
        run_pandoc(&opts.pandoc_cmd, &path, &target)?;
        Some(target)
    } else {
        None
    };

    Ok(ExportResult {
        path,
        sha256,
        bytes: document.len(),
        chapters: metadata.chapters.len(),
        converted,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// YAML front matter for pandoc. Chapters must be in canonical order.
fn build_frontmatter(
    metadata: &StoreMetadata,
    manifest: &ManifestDocument,
    author: &str,
    lang: &str,
    cover: Option<&Path>,
) -> String {
    let first = metadata
        .chapters
        .first()
        .map(|c| c.revision.format("%Y-%m-%d"))
        .unwrap_or_default();
    let last = metadata
        .chapters
        .last()
        .map(|c| c.revision.format("%Y-%m-%d"))
        .unwrap_or_default();

    let mut fm = String::from("---\n");
    fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&manifest.wiki_section)));
    fm.push_str("creator:\n");
    fm.push_str("  - role: author\n");
    fm.push_str(&format!("    text: \"{}\"\n", escape_yaml_string(author)));
    fm.push_str(&format!("date: \"{first}\"\n"));
    fm.push_str(&format!("revision_date: \"{last}\"\n"));
    fm.push_str(&format!("lang: \"{}\"\n", escape_yaml_string(lang)));
    fm.push_str(&format!(
        "publisher: \"r/{}\"\n",
        escape_yaml_string(&manifest.subreddit)
    ));
    if let Some(cover) = cover {
        let cover = cover.to_string_lossy().replace('\\', "/");
        fm.push_str(&format!("cover-image: \"{}\"\n", escape_yaml_string(&cover)));
    }
    fm.push_str("---\n\n");
    fm
}

fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Replace characters most file systems refuse in a file name.
fn sanitize_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| SyncError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| SyncError::io(path, e))?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}

/// Convert `input` with pandoc. The output format follows `output`'s extension.
fn run_pandoc(cmd: &str, input: &Path, output: &Path) -> Result<()> {
    info!(%cmd, output = %output.display(), "running pandoc");

    let result = Command::new(cmd)
        .arg(input)
        .arg("-o")
        .arg(output)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SyncError::Export(format!("failed to start {cmd}: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(SyncError::Export(format!(
            "{cmd} exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
