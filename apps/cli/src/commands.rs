//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use chaptersync_core::pipeline::{ProgressReporter, ProjectReport, ProjectRunConfig};
use chaptersync_core::{ExportOptions, ExportResult, SyncReport};
use chaptersync_fetcher::RedditFetcher;
use chaptersync_manifest::{ManifestFetcher, sanitize_link_text};
use chaptersync_shared::{
    AppConfig, ManifestDocument, ProjectConfig, init_config, load_config, load_config_from,
};
use chaptersync_storage::ChapterStore;
use chaptersync_transform::ChapterCleanup;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// chaptersync: mirror a serialized story from a reddit wiki listing.
#[derive(Parser)]
#[command(
    name = "chaptersync",
    version,
    about = "Sync the chapters listed on a reddit wiki page into local Markdown stores.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.chaptersync/chaptersync.toml.
    #[arg(long, global = true, env = "CHAPTERSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Selects a project, either registered in the config or given inline.
#[derive(Args, Debug, Clone)]
pub(crate) struct ProjectArgs {
    /// Name of a `[[projects]]` entry in the config.
    #[arg(short, long, conflicts_with_all = ["wiki_url", "section"])]
    pub project: Option<String>,

    /// Wiki page listing the chapters.
    #[arg(long, requires = "section")]
    pub wiki_url: Option<String>,

    /// Heading of the wiki section that lists the chapters.
    #[arg(long, requires = "wiki_url")]
    pub section: Option<String>,

    /// Project directory name for an inline project (defaults to the section).
    #[arg(long, requires = "wiki_url")]
    pub name: Option<String>,
}

impl ProjectArgs {
    fn resolve(&self, config: &AppConfig) -> Result<ProjectConfig> {
        match (&self.project, &self.wiki_url, &self.section) {
            (Some(name), _, _) => Ok(config.project(name)?),
            (None, Some(wiki_url), Some(section)) => {
                let name = self
                    .name
                    .clone()
                    .unwrap_or_else(|| sanitize_link_text(section));
                Ok(ProjectConfig::new(&name, wiki_url, section)?)
            }
            _ => Err(eyre!("pass either --project or --wiki-url with --section")),
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run every stage: manifest, raw, process and export.
    Sync {
        #[command(flatten)]
        project: ProjectArgs,

        /// Stop after the processed stage.
        #[arg(long)]
        no_export: bool,
    },

    /// Fetch the wiki page and snapshot its chapter listing.
    Manifest {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Sync the raw store against the latest manifest snapshot.
    Raw {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Sync the processed store against the raw store.
    Process {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Merge the processed store into one document.
    Export {
        #[command(flatten)]
        project: ProjectArgs,

        /// Also convert the document with pandoc.
        #[arg(long)]
        pandoc: bool,
    },

    /// Check both stores' integrity without changing anything.
    Validate {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "chaptersync=info",
        1 => "chaptersync=debug",
        _ => "chaptersync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Sync { project, no_export } => cmd_sync(&config, &project, no_export).await,
        Command::Manifest { project } => cmd_manifest(&config, &project).await,
        Command::Raw { project } => cmd_raw(&config, &project).await,
        Command::Process { project } => cmd_process(&config, &project).await,
        Command::Export { project, pandoc } => cmd_export(&config, &project, pandoc),
        Command::Validate { project } => cmd_validate(&config, &project),
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_sync(config: &AppConfig, args: &ProjectArgs, no_export: bool) -> Result<()> {
    let project = args.resolve(config)?;
    info!(project = %project.name, no_export, "syncing project");

    let run_config = ProjectRunConfig {
        projects_dir: PathBuf::from(&config.defaults.projects_dir),
        output_dir: PathBuf::from(&config.defaults.output_dir),
        reddit: config.reddit.clone(),
        sync: config.sync.clone(),
        export: (!no_export).then(|| config.export.clone()),
        project,
    };

    let reporter = CliProgress::new();
    let report = chaptersync_core::run_project(&run_config, &reporter).await?;

    println!();
    print_manifest(&report.manifest.document, report.manifest.snapshot.as_deref());
    if report.manifest.from_snapshot {
        println!("  (wiki unreachable, used the latest snapshot)");
    }
    print_stage(&report.raw);
    print_stage(&report.processed);
    if let Some(export) = &report.export {
        print_export(export);
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_manifest(config: &AppConfig, args: &ProjectArgs) -> Result<()> {
    let project = args.resolve(config)?;
    let paths = project.paths(Path::new(&config.defaults.projects_dir));
    paths.create_all()?;

    let fetcher = ManifestFetcher::new(&config.reddit)?;
    let update = chaptersync_core::update_manifest(&fetcher, &project, &paths.wiki_dir).await?;

    println!();
    print_manifest(&update.document, update.snapshot.as_deref());
    for chapter in &update.document.chapters {
        println!("    {}  {}", chapter.title, chapter.url);
    }
    println!();
    Ok(())
}

async fn cmd_raw(config: &AppConfig, args: &ProjectArgs) -> Result<()> {
    let project = args.resolve(config)?;
    let paths = project.paths(Path::new(&config.defaults.projects_dir));
    let manifest = latest_manifest(&project, &paths.wiki_dir)?;

    let raw_store = ChapterStore::open(&paths.raw_dir)?;
    let fetcher = RedditFetcher::new(&config.reddit)?;
    let reporter = CliProgress::new();
    let report = chaptersync_core::sync_raw(
        &manifest,
        &raw_store,
        &fetcher,
        config.sync.raw_lookback,
        &reporter,
    )
    .await?;
    reporter.finish();

    println!();
    print_stage(&report);
    println!();
    Ok(())
}

async fn cmd_process(config: &AppConfig, args: &ProjectArgs) -> Result<()> {
    let project = args.resolve(config)?;
    let paths = project.paths(Path::new(&config.defaults.projects_dir));

    let raw_store = ChapterStore::open_readonly(&paths.raw_dir);
    let processed_store = ChapterStore::open(&paths.processed_dir)?;
    let reporter = CliProgress::new();
    let report = chaptersync_core::sync_processed(
        &raw_store,
        &processed_store,
        &ChapterCleanup::default(),
        config.sync.processed_lookback,
        &reporter,
    )
    .await?;
    reporter.finish();

    println!();
    print_stage(&report);
    println!();
    Ok(())
}

fn cmd_export(config: &AppConfig, args: &ProjectArgs, pandoc: bool) -> Result<()> {
    let project = args.resolve(config)?;
    let paths = project.paths(Path::new(&config.defaults.projects_dir));
    let manifest = latest_manifest(&project, &paths.wiki_dir)?;

    let mut opts = ExportOptions::from_config(
        &config.export,
        Path::new(&config.defaults.output_dir),
        &paths.wiki_dir,
    );
    opts.pandoc |= pandoc;

    let processed_store = ChapterStore::open_readonly(&paths.processed_dir);
    let result = chaptersync_core::export(&processed_store, &manifest, &opts)?;

    println!();
    print_export(&result);
    println!();
    Ok(())
}

fn cmd_validate(config: &AppConfig, args: &ProjectArgs) -> Result<()> {
    let project = args.resolve(config)?;
    let paths = project.paths(Path::new(&config.defaults.projects_dir));
    let identity = project.identity();

    println!();
    let mut invalid = 0;
    for (label, dir) in [("raw", &paths.raw_dir), ("processed", &paths.processed_dir)] {
        let store = ChapterStore::open_readonly(dir);
        match store.check(Some(&identity)) {
            Ok(Ok(metadata)) => {
                println!("  {label:<10} ok ({} chapters)", metadata.chapters.len());
            }
            Ok(Err(issue)) => {
                invalid += 1;
                println!("  {label:<10} INVALID: {issue}");
            }
            Err(e) => {
                invalid += 1;
                println!("  {label:<10} UNREADABLE: {e}");
            }
        }
    }
    println!();

    if invalid > 0 {
        return Err(eyre!(
            "{invalid} store(s) failed validation; the next sync will rebuild them"
        ));
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn latest_manifest(project: &ProjectConfig, wiki_dir: &Path) -> Result<ManifestDocument> {
    chaptersync_manifest::load_latest(wiki_dir, &project.identity())?.ok_or_else(|| {
        eyre!(
            "no manifest snapshot for '{}' in {}; run `chaptersync manifest` first",
            project.name,
            wiki_dir.display()
        )
    })
}

fn print_manifest(manifest: &ManifestDocument, snapshot: Option<&Path>) {
    println!("  Manifest:   {} ({})", manifest.wiki_section, manifest.revision_date);
    println!("  Author:     {}", manifest.author.as_deref().unwrap_or("unknown"));
    println!("  Chapters:   {}", manifest.chapters.len());
    if let Some(snapshot) = snapshot {
        println!("  Snapshot:   {}", snapshot.display());
    }
}

fn print_stage(report: &SyncReport) {
    let resync = if report.full_resync { ", full resync" } else { "" };
    println!("  {} store ({}{resync})", report.stage, report.state);
    println!("    New:       {}", report.new);
    println!("    Updated:   {}", report.updated);
    println!("    Rechecked: {}", report.rechecked);
    println!("    Unchanged: {}", report.unchanged);
    println!("    Skipped:   {}", report.skipped);
    println!("    Evicted:   {}", report.evicted);
    println!("    Retained:  {}", report.retained);
    println!("    Total:     {}", report.metadata.chapters.len());
}

fn print_export(result: &ExportResult) {
    println!("  Exported:   {}", result.path.display());
    println!("  Chapters:   {}", result.chapters);
    println!("  Size:       {} bytes", result.bytes);
    println!("  SHA-256:    {}", result.sha256);
    if let Some(converted) = &result.converted {
        println!("  Converted:  {}", converted.display());
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record_done(&self, label: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {label}"));
    }

    fn record_skipped(&self, label: &str, reason: &str, current: usize, total: usize) {
        self.spinner
            .println(format!("  skipped [{current}/{total}] {label}: {reason}"));
    }

    fn stage_done(&self, report: &SyncReport) {
        self.spinner.set_message(format!(
            "{} store converged ({} produced, {} skipped)",
            report.stage,
            report.produced(),
            report.skipped
        ));
    }

    fn done(&self, _report: &ProjectReport) {
        self.finish();
    }
}
