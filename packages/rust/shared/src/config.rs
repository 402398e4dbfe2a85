//! Application configuration for chaptersync.
//!
//! User config lives at `~/.chaptersync/chaptersync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};
use crate::types::StoreIdentity;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "chaptersync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".chaptersync";

// ---------------------------------------------------------------------------
// Config structs (matching chaptersync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote API settings.
    #[serde(default)]
    pub reddit: RedditConfig,

    /// Reconciliation tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Registered projects.
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding one sub-directory per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: String,

    /// Directory exported documents are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_projects_dir() -> String {
    "projects".into()
}
fn default_output_dir() -> String {
    "output".into()
}

/// `[reddit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    /// Base URL requests are sent to. Chapter URL paths are re-rooted here.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// User-Agent header for every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Pause before each remote request.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.reddit.com".into()
}
fn default_user_agent() -> String {
    concat!("chaptersync/", env!("CARGO_PKG_VERSION")).into()
}
fn default_request_delay() -> u64 {
    1000
}
fn default_timeout() -> u64 {
    30
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many of the most recent raw chapters are re-fetched every run.
    ///
    /// Authors sometimes edit a chapter without posting anything new, which
    /// leaves its revision untouched.
    #[serde(default = "default_lookback")]
    pub raw_lookback: usize,

    /// How many of the most recent processed chapters are re-transformed every run.
    #[serde(default = "default_lookback")]
    pub processed_lookback: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            raw_lookback: default_lookback(),
            processed_lookback: default_lookback(),
        }
    }
}

fn default_lookback() -> usize {
    2
}

/// `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Whether to run pandoc on the merged document.
    #[serde(default)]
    pub pandoc: bool,

    /// Pandoc executable.
    #[serde(default = "default_pandoc_cmd")]
    pub pandoc_cmd: String,

    /// Pandoc output format / file extension.
    #[serde(default = "default_format")]
    pub format: String,

    /// Document language written to the front matter.
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pandoc: false,
            pandoc_cmd: default_pandoc_cmd(),
            format: default_format(),
            lang: default_lang(),
        }
    }
}

fn default_pandoc_cmd() -> String {
    "pandoc".into()
}
fn default_format() -> String {
    "epub".into()
}
fn default_lang() -> String {
    "en-US".into()
}

/// `[[projects]]` entry: a registered story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Project directory name.
    pub name: String,
    /// Wiki page listing the chapters.
    pub wiki_url: String,
    /// Heading of the section on that page that lists the chapters.
    pub wiki_section: String,
}

impl AppConfig {
    /// Resolve a registered project by name.
    pub fn project(&self, name: &str) -> Result<ProjectConfig> {
        let entry = self
            .projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SyncError::config(format!("no project named '{name}' in config")))?;
        ProjectConfig::new(&entry.name, &entry.wiki_url, &entry.wiki_section)
    }
}

// ---------------------------------------------------------------------------
// Project config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// A project resolved from its wiki URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub name: String,
    pub subreddit: String,
    pub wiki_uri: String,
    pub wiki_section: String,
}

impl ProjectConfig {
    /// Parse `https://www.reddit.com/r/{subreddit}/wiki/{uri...}`.
    pub fn new(name: &str, wiki_url: &str, wiki_section: &str) -> Result<Self> {
        let url = Url::parse(wiki_url)
            .map_err(|e| SyncError::config(format!("invalid wiki URL '{wiki_url}': {e}")))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            ["r", subreddit, "wiki", uri @ ..] if !uri.is_empty() => Ok(Self {
                name: name.to_string(),
                subreddit: (*subreddit).to_string(),
                wiki_uri: uri.join("/"),
                wiki_section: wiki_section.to_string(),
            }),
            _ => Err(SyncError::config(format!(
                "invalid wiki URL '{wiki_url}': expected https://www.reddit.com/r/{{subreddit}}/wiki/{{page}}"
            ))),
        }
    }

    pub fn identity(&self) -> StoreIdentity {
        StoreIdentity::new(&self.subreddit, &self.wiki_uri, &self.wiki_section)
    }

    /// Directory layout of this project under `projects_dir`.
    pub fn paths(&self, projects_dir: &Path) -> ProjectPaths {
        let root = projects_dir.join(&self.name);
        ProjectPaths {
            wiki_dir: root.join("wiki"),
            raw_dir: root.join("raw"),
            processed_dir: root.join("processed"),
            root,
        }
    }
}

/// Where a project's stores live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    /// Manifest snapshots.
    pub wiki_dir: PathBuf,
    /// Raw store.
    pub raw_dir: PathBuf,
    /// Processed store.
    pub processed_dir: PathBuf,
}

impl ProjectPaths {
    /// Create every project directory.
    pub fn create_all(&self) -> Result<()> {
        for dir in [&self.root, &self.wiki_dir, &self.raw_dir, &self.processed_dir] {
            std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.chaptersync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.chaptersync/chaptersync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("projects_dir"));
        assert!(toml_str.contains("raw_lookback"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.sync.raw_lookback, 2);
        assert_eq!(parsed.sync.processed_lookback, 2);
        assert_eq!(parsed.reddit.api_base, "https://www.reddit.com");
        assert!(!parsed.export.pandoc);
    }

    #[test]
    fn config_with_projects() {
        let toml_str = r#"
[sync]
raw_lookback = 5

[[projects]]
name = "aj4ad"
wiki_url = "https://www.reddit.com/r/HFY/wiki/series/a_job_for_a_deathworlder/"
wiki_section = "A Job For A Deathworlder"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.sync.raw_lookback, 5);
        assert_eq!(config.sync.processed_lookback, 2);
        let project = config.project("aj4ad").expect("resolve project");
        assert_eq!(project.subreddit, "HFY");
        assert_eq!(project.wiki_uri, "series/a_job_for_a_deathworlder");
        assert!(config.project("missing").is_err());
    }

    #[test]
    fn project_parses_wiki_url() {
        let project = ProjectConfig::new(
            "p",
            "https://www.reddit.com/r/HFY/wiki/series/deathworlder",
            "Deathworlder",
        )
        .expect("parse");
        assert_eq!(
            project.identity(),
            StoreIdentity::new("HFY", "series/deathworlder", "Deathworlder")
        );
    }

    #[test]
    fn project_rejects_short_wiki_url() {
        let err = ProjectConfig::new("p", "https://www.reddit.com/r/HFY/", "S").unwrap_err();
        assert!(err.to_string().contains("invalid wiki URL"));
        assert!(ProjectConfig::new("p", "https://www.reddit.com/r/HFY/wiki/", "S").is_err());
        assert!(ProjectConfig::new("p", "not a url", "S").is_err());
    }

    #[test]
    fn project_paths_layout() {
        let project =
            ProjectConfig::new("story", "https://www.reddit.com/r/HFY/wiki/x", "X").unwrap();
        let paths = project.paths(Path::new("/data/projects"));
        assert_eq!(paths.root, PathBuf::from("/data/projects/story"));
        assert_eq!(paths.raw_dir, PathBuf::from("/data/projects/story/raw"));
        assert_eq!(paths.processed_dir, PathBuf::from("/data/projects/story/processed"));
        assert_eq!(paths.wiki_dir, PathBuf::from("/data/projects/story/wiki"));
    }
}
