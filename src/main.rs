//! # kex-mem CLI
//!
//! Indexes a project's `memory/` notes and searches them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kex-mem index` | Incrementally index changed notes |
//! | `kex-mem index --full` | Rebuild every index from scratch |
//! | `kex-mem index <path>` | Re-index a single note |
//! | `kex-mem search "<query>"` | Ranked hybrid search |
//! | `kex-mem embed pending` | Embed notes that have no vector yet |
//! | `kex-mem stats` | Show what is indexed |
//!
//! Logs go to stderr (`-v`, `-q`, or `KEX_MEM_LOG=debug`); results go to
//! stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use kex_mem::collector::Collector;
use kex_mem::config::{self, Config};
use kex_mem::embedding::{self, Embedder};
use kex_mem::indexer::Indexer;
use kex_mem::models::IndexSummary;
use kex_mem::query::{QueryEngine, SearchResponse};
use kex_mem::stats;
use kex_mem::store::IndexStore;

#[derive(Parser)]
#[command(
    name = "kex-mem",
    about = "Index and search a project's markdown notes",
    version
)]
struct Cli {
    /// Project root. Defaults to the nearest ancestor with `.git`,
    /// `package.json` or `memory/`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file. Defaults to `<root>/memory/kex-mem.toml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index in sync with the notes on disk.
    ///
    /// Without arguments only new and changed notes are processed.
    Index {
        /// A single note to re-index, relative to the notes directory.
        path: Option<String>,

        /// Clear the index and rebuild it from every note.
        #[arg(long, conflicts_with = "path")]
        full: bool,
    },

    /// Search indexed notes.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show index statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed every indexed note that has no vector.
    Pending,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("KEX_MEM_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load(cli: &Cli) -> Result<Config> {
    let cwd = std::env::current_dir()?;
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => config::find_project_root(&cwd),
    };

    let cfg = match &cli.config {
        Some(path) => config::load_config(path, &root)?,
        None => config::load_or_default(&root)?,
    };
    tracing::debug!(root = %root.display(), notes = %cfg.index.root.display(), "configuration loaded");
    Ok(cfg)
}

/// Build the embedder when vectors are enabled. Failure here is not fatal:
/// commands continue with lexical search only.
fn optional_embedder(cfg: &Config) -> Option<Box<dyn Embedder>> {
    if !cfg.vector.enabled {
        return None;
    }
    match embedding::create_embedder(&cfg.vector) {
        Ok(embedder) => Some(embedder),
        Err(e) => {
            tracing::warn!(
                provider = cfg.vector.provider.as_str(),
                "embedding provider unavailable, using keyword search only: {:#}",
                e
            );
            None
        }
    }
}

/// Accept a note path relative to the notes root, or a path (absolute or
/// relative to the working directory) that lies inside it.
fn note_key(notes_root: &Path, arg: &str) -> String {
    let candidate = Path::new(arg);
    let on_disk = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(candidate),
            Err(_) => return arg.to_string(),
        }
    };

    let root = notes_root
        .canonicalize()
        .unwrap_or_else(|_| notes_root.to_path_buf());
    let on_disk = on_disk.canonicalize().unwrap_or(on_disk);
    match on_disk.strip_prefix(&root) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => arg.to_string(),
    }
}

fn print_index_summary(summary: &IndexSummary, vectors: bool) {
    println!("index");
    println!("  indexed: {}", summary.indexed);
    println!("  skipped: {}", summary.skipped);
    println!("  removed: {}", summary.removed);
    if vectors {
        println!("  embedded: {}", summary.embedded);
    }
    if let Some(err) = &summary.vector_error {
        println!("  embedding failed: {}", err);
    }
    println!("ok");
}

fn print_search(response: &SearchResponse) {
    if let Some(msg) = &response.invalid_query {
        println!("Invalid query: {}", msg);
        if response.hits.is_empty() {
            return;
        }
    }

    if response.hits.is_empty() {
        println!("No results.");
        return;
    }

    for (i, hit) in response.hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.title);
        println!("    path: {}", hit.path);
        println!(
            "    excerpt: \"{}\"",
            hit.snippet.replace('\n', " ").trim()
        );
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = load(&cli)?;
    let store = IndexStore::open(&cfg).await?;

    match cli.command {
        Commands::Index { path, full } => {
            let collector = Collector::new(&cfg.index)?;
            let embedder = optional_embedder(&cfg);
            let indexer = Indexer::new(&store, &collector, embedder.as_deref());

            let summary = match path {
                Some(path) => indexer.index_one(&note_key(&cfg.index.root, &path)).await?,
                None => indexer.index_all(full).await?,
            };
            print_index_summary(&summary, store.vector_enabled());
        }
        Commands::Search { query, limit, json } => {
            let embedder = optional_embedder(&cfg);
            let engine = QueryEngine::new(&store, embedder.as_deref(), &cfg.retrieval);
            let limit = limit.unwrap_or(cfg.retrieval.default_limit);

            let response = engine.search(&query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search(&response);
            }
        }
        Commands::Embed {
            action: EmbedAction::Pending,
        } => {
            let collector = Collector::new(&cfg.index)?;
            let embedder = if cfg.vector.enabled {
                Some(embedding::create_embedder(&cfg.vector)?)
            } else {
                None
            };
            let indexer = Indexer::new(&store, &collector, embedder.as_deref());

            let summary = indexer.embed_pending().await?;
            println!("embed pending");
            println!("  pending: {}", summary.pending);
            println!("  embedded: {}", summary.embedded);
            if let Some(err) = &summary.error {
                println!("  failed: {}", err);
            }
        }
        Commands::Stats => {
            let stats = stats::collect(&store).await?;
            stats::print(&stats);
        }
    }

    store.close().await;
    Ok(())
}
