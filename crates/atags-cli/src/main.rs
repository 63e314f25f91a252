//! atags CLI
//!
//! Builds and queries the symbol index of a source tree.

mod signals;

use anyhow::{bail, Context, Result};
use atags_indexer::{
    BuildOptions, Cancellation, CtagsProvider, DefinitionProvider, FileLister, IndexBuilder,
    IndexConfig, IndexMode, IndexerError, LanguageMap, Listing, ReferenceExtractor, RunReport,
    SyntaxBackend, TagStore, DB_FILE_NAME,
};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atags")]
#[command(about = "atags - source code definition and reference index")]
#[command(version)]
struct Cli {
    /// Directory holding tags.db (default: current directory)
    #[arg(long, alias = "dbpath", global = true)]
    db_path: Option<PathBuf>,

    /// Extension overrides, e.g. `Python:.py.pyw,Golang:.go`
    #[arg(long, global = true)]
    langmap: Option<String>,

    /// Write per-stage timings to index.profile<pid>.json
    #[arg(short, long, global = true)]
    statistics: bool,

    /// Configuration file (default: <config dir>/atags/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index
    Index {
        /// Only re-index files changed since the last run
        #[arg(short, long)]
        incremental: bool,

        /// Re-index a single file
        #[arg(short = 'u', long, alias = "single_update")]
        single_update: Option<String>,

        /// Concurrent reference extraction workers
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Root of the source tree (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Query the index
    #[command(group(
        ArgGroup::new("kind").args(["definitions", "references", "file", "file_token"])
    ))]
    Query {
        /// Find definitions of PATTERN (default)
        #[arg(short = 'd', long)]
        definitions: bool,

        /// Find references to PATTERN
        #[arg(short = 'r', long)]
        references: bool,

        /// List symbols defined in file PATTERN
        #[arg(short = 'f', long)]
        file: bool,

        /// List tokens referenced in file PATTERN
        #[arg(long, alias = "file_token")]
        file_token: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        pattern: String,
    },

    /// Show index statistics
    Stats {
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Definitions,
    References,
    FileSymbols,
    FileTokens,
}

impl QueryKind {
    fn from_flags(references: bool, file: bool, file_token: bool) -> Self {
        if references {
            QueryKind::References
        } else if file {
            QueryKind::FileSymbols
        } else if file_token {
            QueryKind::FileTokens
        } else {
            QueryKind::Definitions
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => IndexConfig::load_or_default(path),
        None => IndexConfig::load(),
    };
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(langmap) = cli.langmap {
        config.langmap = langmap;
    }
    config.statistics |= cli.statistics;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Index {
            incremental,
            single_update,
            jobs,
            root,
        } => {
            if let Some(jobs) = jobs {
                config.jobs = jobs;
            }
            cmd_index(&config, &root, incremental, single_update).await
        }
        Commands::Query {
            definitions: _,
            references,
            file,
            file_token,
            json,
            pattern,
        } => cmd_query(
            &config,
            QueryKind::from_flags(references, file, file_token),
            &pattern,
            json,
        ),
        Commands::Stats { json } => cmd_stats(&config, json),
    }
}

async fn cmd_index(
    config: &IndexConfig,
    root: &Path,
    incremental: bool,
    single_update: Option<String>,
) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Invalid root {}", root.display()))?;
    let languages = LanguageMap::parse(&config.langmap).context("Invalid --langmap")?;

    std::fs::create_dir_all(&config.db_path)
        .with_context(|| format!("Failed to create {}", config.db_path.display()))?;
    let db_file = config.db_file();

    let mode = if incremental || single_update.is_some() {
        IndexMode::Incremental
    } else {
        IndexMode::Full
    };

    let cancel = Cancellation::new();
    let signal_task = tokio::spawn(signals::cancel_on_shutdown(cancel.clone()));

    let run = Indexing {
        config,
        root: &root,
        db_file: &db_file,
        languages,
        definitions: Arc::new(CtagsProvider::new(
            config.ctags_program.clone(),
            config.ctags_format,
        )),
    };
    let result = run.index(mode, single_update.as_deref(), &cancel).await;

    signal_task.abort();
    let report = result?;

    println!("{}", report);

    if config.statistics {
        write_profile(&report)?;
    }

    Ok(())
}

fn list_root(root: &Path, follow_symlinks: bool) -> Result<Listing> {
    FileLister::new(root)
        .follow_symlinks(follow_symlinks)
        .exclude(DB_FILE_NAME)
        .list()
        .with_context(|| format!("Failed to list {}", root.display()))
}

/// Express a command-line path relative to the index root.
fn relative_to(root: &Path, path: &str) -> String {
    let path = Path::new(path);
    let relative = match path.strip_prefix(root) {
        Ok(rest) => rest,
        Err(_) => path.strip_prefix(".").unwrap_or(path),
    };
    relative.to_string_lossy().into_owned()
}

/// Everything needed to run the builder, possibly twice.
struct Indexing<'a> {
    config: &'a IndexConfig,
    root: &'a Path,
    db_file: &'a Path,
    languages: LanguageMap,
    definitions: Arc<dyn DefinitionProvider>,
}

impl Indexing<'_> {
    /// Index the root in `mode`.
    ///
    /// An incremental request becomes a full index when there is no
    /// database yet or the previous run cannot be built upon.
    async fn index(
        &self,
        mut mode: IndexMode,
        single_update: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<RunReport> {
        if mode == IndexMode::Incremental && !self.db_file.exists() {
            info!(db = ?self.db_file, "No tag database yet, building a full index");
            mode = IndexMode::Full;
        }

        let listing = match (single_update, mode) {
            (Some(path), IndexMode::Incremental) => {
                FileLister::single(relative_to(self.root, path))
            }
            _ => list_root(self.root, self.config.follow_symlinks)?,
        };

        match self.execute(&listing, mode, cancel).await {
            Ok(report) => Ok(report),
            Err(IndexerError::RebuildRequired(reason)) => {
                warn!(%reason, "Incremental index not possible, building a full index");
                let listing = list_root(self.root, self.config.follow_symlinks)?;
                self.execute(&listing, IndexMode::Full, cancel)
                    .await
                    .context("Indexing failed")
            }
            Err(e) if e.is_store_error() => Err(e).with_context(|| {
                format!(
                    "Tag store {} failed, the next run rebuilds it",
                    self.db_file.display()
                )
            }),
            Err(e) => Err(e).context("Indexing failed"),
        }
    }

    async fn execute(
        &self,
        listing: &Listing,
        mode: IndexMode,
        cancel: &Cancellation,
    ) -> Result<RunReport, IndexerError> {
        let store = match mode {
            IndexMode::Full => {
                remove_database(self.db_file)?;
                TagStore::open(self.db_file)?
            }
            IndexMode::Incremental => TagStore::open(self.db_file).map_err(|e| {
                IndexerError::RebuildRequired(format!("cannot open tag database: {}", e))
            })?,
        };

        let references = ReferenceExtractor::new(
            self.root,
            self.languages.clone(),
            Arc::new(SyntaxBackend::new()),
        );
        IndexBuilder::new(
            self.root,
            Arc::new(store),
            references,
            self.definitions.clone(),
        )
            .with_options(BuildOptions {
                mode,
                jobs: self.config.jobs,
                profile: self.config.statistics,
            })
            .run(listing, cancel)
            .await
    }
}

/// Delete the database file and its WAL companions.
fn remove_database(db_file: &Path) -> Result<(), IndexerError> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_file.as_os_str().to_owned();
        name.push(suffix);
        match std::fs::remove_file(&name) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn write_profile(report: &RunReport) -> Result<()> {
    let path = PathBuf::from(format!("index.profile{}.json", std::process::id()));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = ?path, "Wrote run statistics");
    Ok(())
}

fn open_existing(config: &IndexConfig) -> Result<TagStore> {
    let db_file = config.db_file();
    if !db_file.exists() {
        bail!(
            "No tag database at {} (run `atags index` first)",
            db_file.display()
        );
    }
    TagStore::open(&db_file).with_context(|| format!("Failed to open {}", db_file.display()))
}

fn cmd_query(config: &IndexConfig, kind: QueryKind, pattern: &str, json: bool) -> Result<()> {
    let store = open_existing(config)?;
    for line in run_query(&store, kind, pattern, json)? {
        println!("{}", line);
    }
    Ok(())
}

/// Render the results of a query, one output line per row (or one JSON
/// document).
fn run_query(store: &TagStore, kind: QueryKind, pattern: &str, json: bool) -> Result<Vec<String>> {
    let lines = match kind {
        QueryKind::Definitions => render(store.find_definitions(pattern)?, json, |hit| {
            format!("{}\t{}\t{}", hit.path, hit.line, hit.signature)
        })?,
        QueryKind::References => render(store.find_references(pattern)?, json, |hit| {
            format!("{}\t{}", hit.path, hit.line)
        })?,
        QueryKind::FileSymbols => render(store.symbols_in_file(pattern)?, json, |symbol| {
            format!("{}\t{}\t{}", symbol.symbol, symbol.line, symbol.signature)
        })?,
        QueryKind::FileTokens => render(store.references_in_file(pattern)?, json, |token| {
            format!("{}\t{}", token.symbol, token.line)
        })?,
    };
    Ok(lines)
}

fn render<T, F>(rows: Vec<T>, json: bool, format_row: F) -> Result<Vec<String>>
where
    T: Serialize,
    F: Fn(&T) -> String,
{
    if json {
        return Ok(vec![serde_json::to_string_pretty(&rows)?]);
    }
    Ok(rows.iter().map(format_row).collect())
}

fn cmd_stats(config: &IndexConfig, json: bool) -> Result<()> {
    let store = open_existing(config)?;
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats);
    }

    Ok(())
}
