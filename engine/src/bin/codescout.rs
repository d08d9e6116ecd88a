//! codescout CLI.
//!
//! Commands for creating the per-project index, running single-shot and
//! multi-hop queries, inspecting status and compacting, plus memory
//! sync/export/import. Exit codes: 0 success, 1 operational error, 2 usage
//! or configuration error.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use codescout_engine::Aggregation;
use codescout_engine::Config;
use codescout_engine::EngineError;
use codescout_engine::FileSearchResult;
use codescout_engine::IndexBackend;
use codescout_engine::IndexingCoordinator;
use codescout_engine::MultiHopResearcher;
use codescout_engine::ResearchOptions;
use codescout_engine::SearchEngine;
use codescout_engine::SearchHit;
use codescout_engine::SearchMode;
use codescout_engine::cache::ChunkIndex;
use codescout_engine::cache::HashCache;
use codescout_engine::config::PROJECT_DIR;
use codescout_engine::embeddings::provider_from_settings;
use codescout_engine::memory::GitCli;
use codescout_engine::memory::GitSync;
use codescout_engine::memory::export::export_memory;
use codescout_engine::memory::export::import_memory;
use codescout_engine::memory::git_sync::GitSyncOptions;

#[derive(Parser)]
#[command(name = "codescout")]
#[command(version, about = "Local-first code intelligence engine")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the per-project index directory with defaults
    Init {
        /// Project root (default: current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Index a directory (full or incremental)
    Index {
        /// Directory to index (default: current directory)
        path: Option<PathBuf>,

        /// Incremental: only re-index changed files
        #[arg(long)]
        update: bool,

        /// Delete index and caches, then rebuild
        #[arg(long)]
        clean: bool,

        /// Use the parallel worker pool
        #[arg(long)]
        parallel: bool,

        /// Worker count (default: CPU count)
        #[arg(long, default_value_t = 0)]
        workers: usize,
    },

    /// Single-shot search
    Search {
        query: String,

        /// Pass the query to the text index verbatim
        #[arg(long)]
        regex: bool,

        /// Search mode
        #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
        mode: Mode,

        /// Maximum results
        #[arg(short = 'k', long = "limit")]
        limit: Option<usize>,

        /// Skip the stale-chunk filter
        #[arg(long)]
        no_filter: bool,

        /// Rank whole files by aggregated chunk scores
        #[arg(long)]
        files: bool,

        /// Chunk-score aggregation for --files
        #[arg(long, value_enum, default_value_t = Agg::Sum)]
        aggregation: Agg,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Multi-hop research over the index
    Research {
        question: String,

        /// Expansion hops
        #[arg(long)]
        hops: Option<i32>,

        /// Print the derived call graph and entry points
        #[arg(long)]
        graph: bool,

        /// Results per hop
        #[arg(short = 'k', long = "limit")]
        limit: Option<usize>,

        /// Skip the stale-chunk filter
        #[arg(long)]
        no_filter: bool,
    },

    /// Report index sizes, ages and staleness
    Status,

    /// Reclaim superseded chunks
    Compact {
        /// Directory to compact (default: current directory)
        path: Option<PathBuf>,

        /// Staleness ratio that triggers compaction
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,

        /// Compact regardless of the staleness ratio
        #[arg(long)]
        force: bool,
    },

    /// Show or edit the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Repository-history memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Open the config file in $EDITOR
    Edit,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Mirror git tags and merges into memory
    Sync {
        /// Only process tags
        #[arg(long)]
        tags_only: bool,
        /// Only process merges
        #[arg(long)]
        merges_only: bool,
        /// Maximum events per category
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Minimum merge importance (low, medium, high)
        #[arg(long, default_value = "low")]
        min_importance: String,
    },
    /// Export memory to memory.json for git-committed sharing
    Export {
        /// Output path (default: .codescout/memory.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import memory from a memory.json file
    Import {
        /// Input path (default: .codescout/memory.json)
        file: Option<PathBuf>,
    },
    /// Search approved memory
    Search {
        query: String,
        /// Maximum results
        #[arg(short = 'k', long = "limit", default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Lexical,
    Semantic,
    Hybrid,
}

impl From<Mode> for SearchMode {
    fn from(mode: Mode) -> SearchMode {
        match mode {
            Mode::Lexical => SearchMode::Lexical,
            Mode::Semantic => SearchMode::Semantic,
            Mode::Hybrid => SearchMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Table,
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Agg {
    Sum,
    Max,
}

impl From<Agg> for Aggregation {
    fn from(agg: Agg) -> Aggregation {
        match agg {
            Agg::Sum => Aggregation::Sum,
            Agg::Max => Aggregation::Max,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "codescout_engine=debug,codescout=debug"
    } else {
        "codescout_engine=info,codescout=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Cooperative cancellation on Ctrl+C
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing at the next boundary");
            signal_cancel.cancel();
        }
    });

    if let Err(e) = run(cli.command, &cancel).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(command: Command, cancel: &CancellationToken) -> Result<(), EngineError> {
    match command {
        Command::Init { path } => cmd_init(path).await,
        Command::Index {
            path,
            update,
            clean,
            parallel,
            workers,
        } => cmd_index(path, update, clean, parallel, workers, cancel).await,
        Command::Search {
            query,
            regex,
            mode,
            limit,
            no_filter,
            files,
            aggregation,
            format,
            output,
        } => {
            let opts = SearchCmdOptions {
                regex,
                mode,
                limit,
                no_filter,
                files,
                aggregation,
                format,
                output,
            };
            cmd_search(&query, opts).await
        }
        Command::Research {
            question,
            hops,
            graph,
            limit,
            no_filter,
        } => cmd_research(&question, hops, graph, limit, no_filter, cancel).await,
        Command::Status => cmd_status().await,
        Command::Compact {
            path,
            threshold,
            force,
        } => cmd_compact(path, threshold, force, cancel).await,
        Command::Config { action } => cmd_config(action),
        Command::Memory { action } => cmd_memory(action).await,
    }
}

/// Resolved per-project paths.
struct ProjectPaths {
    root: PathBuf,
    config: PathBuf,
    db: PathBuf,
    hash_cache: PathBuf,
    chunk_index: PathBuf,
    memory: PathBuf,
}

impl ProjectPaths {
    fn resolve(root: Option<PathBuf>) -> Result<Self, EngineError> {
        let root = match root {
            Some(p) => p,
            None => std::env::current_dir()
                .map_err(|e| EngineError::io(PathBuf::from("."), e))?,
        };
        let project = root.join(PROJECT_DIR);
        Ok(Self {
            config: project.join("config.json"),
            db: project.join("index.db"),
            hash_cache: project.join("cache").join("file_hashes.json"),
            chunk_index: project.join("chunk_index.json"),
            memory: project.join("memory.json"),
            root,
        })
    }

    fn load_config(&self) -> Result<Config, EngineError> {
        let config = Config::load_for(&self.root)?;
        config.validate()?;
        Ok(config)
    }

    fn open_backend(&self, config: &Config, writable: bool) -> Result<Arc<IndexBackend>, EngineError> {
        let embedder = provider_from_settings(&config.embedding);
        let dimensions = config.embedding.dimensions;
        let max_pending = config.memory.max_pending_decisions;
        let backend = if writable {
            IndexBackend::create_with_pending_cap(&self.db, embedder, dimensions, max_pending)?
        } else {
            IndexBackend::open_with_pending_cap(&self.db, false, embedder, dimensions, max_pending)?
        };
        Ok(Arc::new(backend))
    }
}

async fn cmd_init(path: Option<PathBuf>) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(path)?;

    let config = Config::default();
    config.save(&paths.config)?;

    let backend = paths.open_backend(&config, true)?;
    backend.seal().await?;

    println!("Initialized {}", paths.root.join(PROJECT_DIR).display());
    println!("  config: {}", paths.config.display());
    println!("  index:  {}", paths.db.display());
    Ok(())
}

async fn cmd_index(
    path: Option<PathBuf>,
    update: bool,
    clean: bool,
    parallel: bool,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(path)?;
    let config = paths.load_config()?;

    if clean {
        remove_index_files(&paths)?;
        println!("Removed previous index and caches");
    }

    let backend = paths.open_backend(&config, true)?;
    let coordinator = IndexingCoordinator::new(config, backend.clone());

    let stats = if update {
        let mut hash_cache = HashCache::load(&paths.hash_cache);
        let mut chunk_index = ChunkIndex::load(&paths.chunk_index);
        coordinator
            .index_directory_incremental(&paths.root, &mut hash_cache, &mut chunk_index, cancel)
            .await?
    } else if parallel || workers > 0 {
        coordinator
            .index_directory_parallel(&paths.root, workers, cancel)
            .await?
    } else {
        coordinator.index_directory(&paths.root, cancel).await?
    };

    backend.seal().await?;

    println!(
        "Indexed {} of {} files ({} chunks, {} skipped, {} errors)",
        stats.indexed_files,
        stats.total_files,
        stats.total_chunks,
        stats.skipped_files,
        stats.errors.len()
    );
    println!("  {}", stats.metrics);
    for (file, error) in stats.errors.iter().take(10) {
        println!("  failed: {}: {error}", file.display());
    }
    Ok(())
}

fn remove_index_files(paths: &ProjectPaths) -> Result<(), EngineError> {
    for suffix in ["", "-wal", "-shm"] {
        let file = PathBuf::from(format!("{}{suffix}", paths.db.display()));
        if file.exists() {
            std::fs::remove_file(&file).map_err(|e| EngineError::io(&file, e))?;
        }
    }
    if let Some(cache_dir) = paths.hash_cache.parent() {
        if cache_dir.exists() {
            std::fs::remove_dir_all(cache_dir).map_err(|e| EngineError::io(cache_dir, e))?;
        }
    }
    if paths.chunk_index.exists() {
        std::fs::remove_file(&paths.chunk_index)
            .map_err(|e| EngineError::io(&paths.chunk_index, e))?;
    }
    Ok(())
}

/// Options for the search command.
struct SearchCmdOptions {
    regex: bool,
    mode: Mode,
    limit: Option<usize>,
    no_filter: bool,
    files: bool,
    aggregation: Agg,
    format: Format,
    output: Option<PathBuf>,
}

async fn cmd_search(query: &str, opts: SearchCmdOptions) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(None)?;
    let config = paths.load_config()?;
    let backend = paths.open_backend(&config, false)?;

    let k = opts.limit.unwrap_or(config.search.default_limit);
    let mode = if opts.regex {
        SearchMode::Lexical
    } else {
        opts.mode.into()
    };

    let mut engine = SearchEngine::new(backend, config.search.clone());
    if !opts.no_filter {
        let chunk_index = ChunkIndex::load(&paths.chunk_index);
        engine = engine.with_chunk_index(&chunk_index);
    }

    let (rendered, count) = if opts.files {
        let files = engine
            .search_files(query, k, opts.aggregation.into())
            .await?;
        (render_file_hits(&files, opts.format)?, files.len())
    } else {
        let hits = engine.search(query, mode, k, opts.regex).await?;
        (render_hits(&hits, opts.format)?, hits.len())
    };

    match opts.output {
        Some(file) => {
            std::fs::write(&file, rendered).map_err(|e| EngineError::io(&file, e))?;
            println!("Wrote {count} results to {}", file.display());
        }
        None => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(rendered.as_bytes());
        }
    }
    Ok(())
}

async fn cmd_research(
    question: &str,
    hops: Option<i32>,
    graph: bool,
    limit: Option<usize>,
    no_filter: bool,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(None)?;
    let config = paths.load_config()?;
    let backend = paths.open_backend(&config, false)?;

    if !config.search.multi_hop_enabled && hops.is_none() {
        tracing::warn!("Multi-hop research disabled in config; running with 0 hops");
    }

    let options = ResearchOptions {
        max_hops: hops.unwrap_or(if config.search.multi_hop_enabled {
            config.search.max_hops
        } else {
            0
        }),
        max_results_per_hop: limit.unwrap_or(config.search.default_limit),
        ..ResearchOptions::default()
    };

    let researcher = MultiHopResearcher::new(backend, options);
    let mut result = researcher.research(question, cancel).await?;

    if !no_filter {
        let chunk_index = ChunkIndex::load(&paths.chunk_index);
        let valid = chunk_index.valid_chunks();
        if !valid.is_empty() {
            result
                .chunks
                .retain(|c| c.id.is_none_or(|id| valid.contains(&id.to_string())));
        }
    }

    println!("Question: {}", result.question);
    println!(
        "Found {} chunks over {} hops ({} entities examined)\n",
        result.chunks.len(),
        result.hops_executed,
        result.total_entities_found
    );

    for (i, chunk) in result.chunks.iter().enumerate() {
        println!(
            "{}. {} [{}] {}:{}-{}",
            i + 1,
            chunk.symbol,
            chunk.chunk_type,
            chunk.file_path.display(),
            chunk.start_line,
            chunk.end_line
        );
        if let Some(line) = chunk.code.lines().find(|l| !l.trim().is_empty()) {
            println!("   {}", line.trim());
        }
    }

    if graph {
        println!("\nCall graph:");
        let call_graph = MultiHopResearcher::build_call_graph(&result.relationships);
        for (from, edges) in &call_graph {
            for edge in edges {
                println!("  {from} -> {} [{}]", edge.target, edge.relationship_type);
            }
        }

        let entry_points = MultiHopResearcher::get_entry_points(&result.relationships);
        println!("\nEntry points: {}", entry_points.join(", "));
    }
    Ok(())
}

async fn cmd_status() -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(None)?;
    let config = paths.load_config()?;

    if !paths.db.exists() {
        println!("No index found. Run `codescout init && codescout index` first.");
        return Ok(());
    }

    let backend = paths.open_backend(&config, false)?;
    let stats = backend.stats().await?;

    println!("Index: {}", paths.db.display());
    println!("  size: {}", human_bytes(stats.db_size_bytes));
    if let Ok(meta) = std::fs::metadata(&paths.db) {
        if let Ok(modified) = meta.modified() {
            let age = modified.elapsed().unwrap_or_default();
            println!("  age: {}s since last write", age.as_secs());
        }
    }
    println!("  files: {}", stats.total_files);
    println!("  chunks: {}", stats.total_chunks);
    println!("  embedded: {}", stats.embedded_chunks);

    let hash_cache = HashCache::load(&paths.hash_cache);
    println!("Hash cache: {} files", hash_cache.len());

    let chunk_index = ChunkIndex::load(&paths.chunk_index);
    let summary = chunk_index.staleness_summary();
    println!(
        "Staleness: {} total, {} valid, {} stale (ratio {:.2})",
        summary.total, summary.valid, summary.stale, summary.ratio
    );
    println!("  status: {} - {}", summary.status, summary.recommendation);
    Ok(())
}

async fn cmd_compact(
    path: Option<PathBuf>,
    threshold: f64,
    force: bool,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(path)?;
    let config = paths.load_config()?;
    let backend = paths.open_backend(&config, true)?;
    let coordinator = IndexingCoordinator::new(config, backend);

    let mut hash_cache = HashCache::load(&paths.hash_cache);
    let mut chunk_index = ChunkIndex::load(&paths.chunk_index);

    let report = coordinator
        .compact_index(
            &paths.root,
            &mut hash_cache,
            &mut chunk_index,
            threshold,
            force,
            cancel,
        )
        .await?;

    if report.ran {
        println!(
            "Compacted: removed {} superseded chunks (staleness was {:.2})",
            report.removed_chunks, report.staleness_ratio
        );
    } else {
        println!(
            "Staleness {:.2} below threshold {threshold:.2}; nothing to do (use --force to override)",
            report.staleness_ratio
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(None)?;
    match action {
        ConfigAction::Show => {
            let config = paths.load_config()?;
            let json =
                serde_json::to_string_pretty(&config).map_err(|e| EngineError::Internal {
                    cause: format!("config serialization failed: {e}"),
                })?;
            println!("{json}");
        }
        ConfigAction::Path => {
            println!("{}", paths.config.display());
        }
        ConfigAction::Edit => {
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            if !paths.config.exists() {
                Config::default().save(&paths.config)?;
            }
            let status = std::process::Command::new(&editor)
                .arg(&paths.config)
                .status()
                .map_err(|e| EngineError::io(&paths.config, e))?;
            if !status.success() {
                return Err(EngineError::Config {
                    field: "editor".to_string(),
                    cause: format!("{editor} exited with {status}"),
                });
            }
            // Surface syntax errors immediately after editing
            paths.load_config()?;
        }
    }
    Ok(())
}

async fn cmd_memory(action: MemoryAction) -> Result<(), EngineError> {
    let paths = ProjectPaths::resolve(None)?;
    let config = paths.load_config()?;
    let backend = paths.open_backend(&config, true)?;

    match action {
        MemoryAction::Sync {
            tags_only,
            merges_only,
            limit,
            min_importance,
        } => {
            if !GitCli::is_git_repo(&paths.root) {
                return Err(EngineError::Config {
                    field: "memory sync".to_string(),
                    cause: format!("{} is not a git repository", paths.root.display()),
                });
            }
            let sync = GitSync::new(backend, Arc::new(GitCli::new(&paths.root)));
            let stats = sync
                .sync(&GitSyncOptions {
                    limit,
                    tags_only,
                    merges_only,
                    min_importance,
                })
                .await?;
            println!(
                "Synced: {} changelogs (+{} skipped), {} timeline events (+{} skipped)",
                stats.changelogs_added,
                stats.changelogs_skipped,
                stats.timeline_added,
                stats.timeline_skipped
            );
            for error in &stats.errors {
                println!("  warning: {error}");
            }
        }
        MemoryAction::Export { output } => {
            let target = output.unwrap_or(paths.memory);
            let project = paths
                .root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string());
            let export = export_memory(&backend, &project, &target).await?;
            println!(
                "Exported {} timeline events, {} changelogs, {} decisions to {}",
                export.timeline.len(),
                export.changelogs.len(),
                export.decisions.len(),
                target.display()
            );
        }
        MemoryAction::Import { file } => {
            let source = file.unwrap_or(paths.memory);
            let result = import_memory(&backend, &source).await?;
            println!(
                "Imported {} entries ({} already present)",
                result.added, result.skipped
            );
        }
        MemoryAction::Search { query, limit } => {
            let hits = backend.search_memory(&query, limit).await?;
            if hits.is_empty() {
                println!("No matching memory.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let category = hit.category.as_deref().unwrap_or("uncategorized");
                println!("{}. [{}] {} (score {:.4})", i + 1, category, hit.title, hit.score);
                if let Some(line) = hit.content.lines().next() {
                    println!("   {line}");
                }
            }
        }
    }
    Ok(())
}

fn render_hits(hits: &[SearchHit], format: Format) -> Result<String, EngineError> {
    let mut out = String::new();
    match format {
        Format::Text => {
            for (i, hit) in hits.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {} [{}] {}:{}-{} (score {:.4})\n",
                    i + 1,
                    hit.chunk.symbol,
                    hit.chunk.chunk_type,
                    hit.chunk.file_path.display(),
                    hit.chunk.start_line,
                    hit.chunk.end_line,
                    hit.score
                ));
                if let Some(snippet) = &hit.snippet {
                    out.push_str(&format!("   {snippet}\n"));
                }
            }
            if hits.is_empty() {
                out.push_str("No results.\n");
            }
        }
        Format::Json => {
            let rows: Vec<serde_json::Value> = hits
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "symbol": hit.chunk.symbol,
                        "chunk_type": hit.chunk.chunk_type,
                        "language": hit.chunk.language,
                        "file_path": hit.chunk.file_path,
                        "start_line": hit.chunk.start_line,
                        "end_line": hit.chunk.end_line,
                        "score": hit.score,
                        "snippet": hit.snippet,
                        "code": hit.chunk.code,
                    })
                })
                .collect();
            out = serde_json::to_string_pretty(&rows).map_err(|e| EngineError::Internal {
                cause: format!("result serialization failed: {e}"),
            })?;
            out.push('\n');
        }
        Format::Table => {
            out.push_str(&format!(
                "{:<30} {:<10} {:<40} {:>8}\n",
                "SYMBOL", "TYPE", "LOCATION", "SCORE"
            ));
            for hit in hits {
                let location = format!(
                    "{}:{}-{}",
                    hit.chunk.file_path.display(),
                    hit.chunk.start_line,
                    hit.chunk.end_line
                );
                out.push_str(&format!(
                    "{:<30} {:<10} {:<40} {:>8.4}\n",
                    truncate(&hit.chunk.symbol, 30),
                    hit.chunk.chunk_type.to_string(),
                    truncate(&location, 40),
                    hit.score
                ));
            }
        }
        Format::Csv => {
            out.push_str("symbol,chunk_type,file_path,start_line,end_line,score\n");
            for hit in hits {
                out.push_str(&format!(
                    "{},{},{},{},{},{}\n",
                    csv_escape(&hit.chunk.symbol),
                    hit.chunk.chunk_type,
                    csv_escape(&hit.chunk.file_path.to_string_lossy()),
                    hit.chunk.start_line,
                    hit.chunk.end_line,
                    hit.score
                ));
            }
        }
    }
    Ok(out)
}

fn render_file_hits(files: &[FileSearchResult], format: Format) -> Result<String, EngineError> {
    let mut out = String::new();
    match format {
        Format::Text => {
            for (i, hit) in files.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {} (score {:.4})\n",
                    i + 1,
                    hit.file_path.display(),
                    hit.score
                ));
            }
            if files.is_empty() {
                out.push_str("No results.\n");
            }
        }
        Format::Json => {
            let rows: Vec<serde_json::Value> = files
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "file_path": hit.file_path,
                        "score": hit.score,
                    })
                })
                .collect();
            out = serde_json::to_string_pretty(&rows).map_err(|e| EngineError::Internal {
                cause: format!("result serialization failed: {e}"),
            })?;
            out.push('\n');
        }
        Format::Table => {
            out.push_str(&format!("{:<60} {:>8}\n", "FILE", "SCORE"));
            for hit in files {
                out.push_str(&format!(
                    "{:<60} {:>8.4}\n",
                    truncate(&hit.file_path.to_string_lossy(), 60),
                    hit.score
                ));
            }
        }
        Format::Csv => {
            out.push_str("file_path,score\n");
            for hit in files {
                out.push_str(&format!(
                    "{},{}\n",
                    csv_escape(&hit.file_path.to_string_lossy()),
                    hit.score
                ));
            }
        }
    }
    Ok(out)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
