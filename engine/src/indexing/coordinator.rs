//! Indexing coordinator.
//!
//! Drives discovery → parse → concept extraction → chunking → batched
//! persistence, with per-file retry and isolation, hash-based incremental
//! re-indexing, a bounded worker-pool parallel mode and staleness-driven
//! compaction.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codescout_file_ignore::FileScanner;
use codescout_file_ignore::ScanConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::ChunkIndex;
use crate::cache::HashCache;
use crate::chunking::CastChunker;
use crate::chunking::CastConfig;
use crate::config::Config;
use crate::error::EngineError;
use crate::error::Result;
use crate::indexing::metrics::PerformanceMetrics;
use crate::indexing::retry::RetryPolicy;
use crate::parse::ParseEngine;
use crate::storage::IndexBackend;
use crate::types::Chunk;
use crate::types::ChunkId;
use crate::types::Language;

/// Outcome of one indexing invocation.
#[derive(Debug)]
pub struct IndexingStats {
    pub total_files: usize,
    pub changed_files: usize,
    pub skipped_files: usize,
    pub indexed_files: usize,
    pub total_chunks: usize,
    /// Per-file failures; they never abort the run.
    pub errors: Vec<(PathBuf, String)>,
    pub metrics: PerformanceMetrics,
}

impl IndexingStats {
    fn new(total_files: usize) -> Self {
        Self {
            total_files,
            changed_files: 0,
            skipped_files: 0,
            indexed_files: 0,
            total_chunks: 0,
            errors: Vec::new(),
            metrics: PerformanceMetrics::new(),
        }
    }
}

/// Outcome of a compaction request.
#[derive(Debug)]
pub struct CompactReport {
    /// False when the staleness ratio was below the threshold.
    pub ran: bool,
    pub staleness_ratio: f64,
    pub removed_chunks: usize,
    pub stats: Option<IndexingStats>,
}

/// Coordinates the indexing pipeline against one backend.
pub struct IndexingCoordinator {
    config: Config,
    backend: Arc<IndexBackend>,
    engine: Arc<ParseEngine>,
    chunker: Arc<CastChunker>,
    retry: RetryPolicy,
}

impl IndexingCoordinator {
    pub fn new(config: Config, backend: Arc<IndexBackend>) -> Self {
        let engine = Arc::new(ParseEngine::new());
        let chunker = Arc::new(CastChunker::new(
            CastConfig {
                max_chunk_size: config.chunking.max_chunk_size,
                min_chunk_size: config.chunking.min_chunk_size,
                merge_threshold: config.chunking.merge_threshold,
                greedy_merge: config.chunking.greedy_merge,
            },
            engine.clone(),
        ));
        Self {
            config,
            backend,
            engine,
            chunker,
            retry: RetryPolicy::default(),
        }
    }

    /// Discover indexable files under `root`.
    pub fn discover_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let scan_config = ScanConfig {
            include_patterns: self.config.indexing.include_patterns.clone(),
            exclude_patterns: self.config.indexing.exclude_patterns.clone(),
            max_file_size_mb: self.config.indexing.max_file_size_mb,
            respect_gitignore: true,
        };
        let scanner = FileScanner::new(&scan_config).map_err(|e| EngineError::Config {
            field: "indexing.include_patterns / exclude_patterns".to_string(),
            cause: e.to_string(),
        })?;
        Ok(scanner.scan(root))
    }

    /// Full index of a directory with cross-file batching.
    pub async fn index_directory(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<IndexingStats> {
        let files = self.discover_files(root)?;
        let mut stats = IndexingStats::new(files.len());
        let mut buffer: Vec<Chunk> = Vec::new();

        for file in &files {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let language = Language::from_path(file);
            if !self.engine.is_supported(language) {
                tracing::debug!(path = %file.display(), "Skipping unsupported language");
                stats.skipped_files += 1;
                continue;
            }

            match self.chunk_file_guarded(file.clone(), language).await {
                Ok(chunks) if chunks.is_empty() => {}
                Ok(chunks) => {
                    self.account_file(&mut stats, file, chunks.len());
                    buffer.extend(chunks);
                    if buffer.len() >= self.config.indexing.chunk_batch_size {
                        self.flush(&mut buffer).await?;
                    }
                }
                Err(e) => {
                    stats.errors.push((file.clone(), e.to_string()));
                    stats.metrics.errors_count += 1;
                }
            }
        }

        self.flush(&mut buffer).await?;
        stats.metrics.finish();
        tracing::info!(metrics = %stats.metrics, "Indexing complete");
        Ok(stats)
    }

    /// Full index with a bounded worker pool.
    ///
    /// Producer (file list) → workers (parse + chunk) → this task as the
    /// single persisting consumer, honoring the store's single-writer
    /// discipline.
    pub async fn index_directory_parallel(
        &self,
        root: &Path,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<IndexingStats> {
        let files = self.discover_files(root)?;
        let mut stats = IndexingStats::new(files.len());

        let worker_count = if workers == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        } else {
            workers
        };

        let (path_tx, path_rx) = async_channel::bounded::<PathBuf>(worker_count * 2);
        let (chunk_tx, mut chunk_rx) =
            mpsc::channel::<(PathBuf, Result<Vec<Chunk>>)>(worker_count * 2);

        // Producer
        let feeder_cancel = cancel.clone();
        let engine = self.engine.clone();
        let feeder = tokio::spawn(async move {
            let mut skipped = 0usize;
            for file in files {
                if feeder_cancel.is_cancelled() {
                    break;
                }
                if !engine.is_supported(Language::from_path(&file)) {
                    skipped += 1;
                    continue;
                }
                if path_tx.send(file).await.is_err() {
                    break;
                }
            }
            skipped
        });

        // Workers: one file end-to-end up to chunk creation
        for _ in 0..worker_count {
            let rx = path_rx.clone();
            let tx = chunk_tx.clone();
            let chunker = self.chunker.clone();
            let retry = self.retry.clone();
            let timeout = Duration::from_secs(self.config.indexing.parse_timeout_secs);
            tokio::spawn(async move {
                while let Ok(file) = rx.recv().await {
                    let language = Language::from_path(&file);
                    let result =
                        chunk_file_task(chunker.clone(), file.clone(), language, timeout, &retry)
                            .await;
                    if tx.send((file, result)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(chunk_tx);
        drop(path_rx);

        // Single persisting consumer
        let mut buffer: Vec<Chunk> = Vec::new();
        while let Some((file, result)) = chunk_rx.recv().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match result {
                Ok(chunks) if chunks.is_empty() => {}
                Ok(chunks) => {
                    self.account_file(&mut stats, &file, chunks.len());
                    buffer.extend(chunks);
                    if buffer.len() >= self.config.indexing.chunk_batch_size {
                        self.flush(&mut buffer).await?;
                    }
                }
                Err(e) => {
                    stats.errors.push((file, e.to_string()));
                    stats.metrics.errors_count += 1;
                }
            }
        }

        stats.skipped_files += feeder.await.unwrap_or(0);
        self.flush(&mut buffer).await?;
        stats.metrics.finish();
        tracing::info!(workers = worker_count, metrics = %stats.metrics, "Parallel indexing complete");
        Ok(stats)
    }

    /// Hash-based incremental index with chunk-ledger integration.
    pub async fn index_directory_incremental(
        &self,
        root: &Path,
        hash_cache: &mut HashCache,
        chunk_index: &mut ChunkIndex,
        cancel: &CancellationToken,
    ) -> Result<IndexingStats> {
        let stats = self
            .run_incremental(root, hash_cache, chunk_index, false, cancel)
            .await?;
        hash_cache.save()?;
        chunk_index.save()?;
        Ok(stats)
    }

    async fn run_incremental(
        &self,
        root: &Path,
        hash_cache: &mut HashCache,
        chunk_index: &mut ChunkIndex,
        force_all: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexingStats> {
        let files = self.discover_files(root)?;
        let mut stats = IndexingStats::new(files.len());

        for file in &files {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if !force_all && !hash_cache.has_changed(file) {
                stats.skipped_files += 1;
                continue;
            }
            stats.changed_files += 1;

            let language = Language::from_path(file);
            if !self.engine.is_supported(language) {
                tracing::debug!(path = %file.display(), "Skipping unsupported language");
                continue;
            }

            let chunks = match self.chunk_file_guarded(file.clone(), language).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    stats.errors.push((file.clone(), e.to_string()));
                    stats.metrics.errors_count += 1;
                    continue;
                }
            };
            if chunks.is_empty() {
                continue;
            }

            // Incremental mode persists per file so each file's chunk ids
            // can flow into the caches.
            let count = chunks.len();
            let ids = self.store_with_retry(chunks).await?;
            let id_strings: Vec<String> = ids.iter().map(ToString::to_string).collect();

            self.account_file(&mut stats, file, count);

            let record = hash_cache.update(file, id_strings.clone())?;
            chunk_index.update_file(file, record.hash, record.mtime, record.size, &id_strings);
        }

        // Files that vanished since the last run take their chunks with them.
        let seen: HashSet<String> = files
            .iter()
            .map(|f| f.to_string_lossy().to_string())
            .collect();
        chunk_index.cleanup_deleted_files(&seen);

        stats.metrics.finish();
        tracing::info!(metrics = %stats.metrics, "Incremental indexing complete");
        Ok(stats)
    }

    /// Compact when the staleness ratio crosses `threshold` (or `force`).
    ///
    /// Strategy: re-index every file in the root - upsert-by-uri collapses
    /// surviving spans onto their existing ids - then stale-mark deleted
    /// files, drop superseded rows from the store and prune the ledger.
    pub async fn compact_index(
        &self,
        root: &Path,
        hash_cache: &mut HashCache,
        chunk_index: &mut ChunkIndex,
        threshold: f64,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<CompactReport> {
        let summary = chunk_index.staleness_summary();
        if !force && summary.ratio < threshold {
            tracing::info!(
                ratio = summary.ratio,
                threshold,
                "Staleness below threshold, skipping compaction"
            );
            return Ok(CompactReport {
                ran: false,
                staleness_ratio: summary.ratio,
                removed_chunks: 0,
                stats: None,
            });
        }

        let stats = self
            .run_incremental(root, hash_cache, chunk_index, true, cancel)
            .await?;

        let valid: HashSet<ChunkId> = chunk_index
            .valid_chunks()
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        let removed = self.backend.retain_chunks(valid).await?;
        chunk_index.prune_stale();

        let seen: HashSet<String> = self
            .discover_files(root)?
            .iter()
            .map(|f| f.to_string_lossy().to_string())
            .collect();
        hash_cache.retain_files(&seen);

        hash_cache.save()?;
        chunk_index.save()?;
        self.backend.seal().await?;

        Ok(CompactReport {
            ran: true,
            staleness_ratio: summary.ratio,
            removed_chunks: removed,
            stats: Some(stats),
        })
    }

    fn account_file(&self, stats: &mut IndexingStats, file: &Path, chunk_count: usize) {
        stats.indexed_files += 1;
        stats.total_chunks += chunk_count;
        stats.metrics.files_processed += 1;
        stats.metrics.chunks_created += chunk_count as u64;
        if let Ok(meta) = std::fs::metadata(file) {
            stats.metrics.bytes_processed += meta.len();
        }
    }

    async fn chunk_file_guarded(&self, file: PathBuf, language: Language) -> Result<Vec<Chunk>> {
        let timeout = Duration::from_secs(self.config.indexing.parse_timeout_secs);
        chunk_file_task(self.chunker.clone(), file, language, timeout, &self.retry).await
    }

    async fn flush(&self, buffer: &mut Vec<Chunk>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let chunks = std::mem::take(buffer);
        self.store_with_retry(chunks).await?;
        Ok(())
    }

    async fn store_with_retry(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        // A timed-out embedding batch is retried once; other store failures
        // propagate immediately.
        let once = RetryPolicy {
            max_attempts: 2,
            ..self.retry.clone()
        };
        once.run(|| {
            let chunks = chunks.clone();
            async move { self.backend.store_chunks_batch(chunks).await }
        })
        .await
    }
}

/// Parse and chunk one file on the blocking pool, with a soft timeout and
/// retry on transient I/O failures.
async fn chunk_file_task(
    chunker: Arc<CastChunker>,
    file: PathBuf,
    language: Language,
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<Vec<Chunk>> {
    retry
        .run(move || {
            let chunker = chunker.clone();
            let file = file.clone();
            async move {
                let work_file = file.clone();
                let work = tokio::task::spawn_blocking(move || {
                    chunker.chunk_file(&work_file, language)
                });

                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => Err(EngineError::Internal {
                        cause: format!("chunking task failed: {join_err}"),
                    }),
                    Err(_) => Err(EngineError::Parse {
                        path: file,
                        cause: format!("parse timed out after {timeout:?}"),
                    }),
                }
            }
        })
        .await
}
