//! Unified persistent store for chunks, text index, vectors and memory.
//!
//! Single-writer, multi-reader, embedded in-process. The chunks table is
//! keyed by integer id with a uniqueness constraint on
//! `uri = "{file_path}:{start}-{end}"` so that re-indexing the same span
//! preserves the id. FTS5 triggers keep the text index in lock-step with
//! the chunks table; embeddings live in a sibling vector table written in
//! the same transaction as their chunks.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::params;

use crate::embeddings::EmbeddingProvider;
use crate::error::EngineError;
use crate::error::Result;
use crate::search::query::preprocess_code_query;
use crate::storage::sqlite::OptionalExt;
use crate::storage::sqlite::SqliteStore;
use crate::storage::vector;
use crate::types::Aggregation;
use crate::types::Chunk;
use crate::types::ChunkId;
use crate::types::ChunkType;
use crate::types::FileSearchResult;
use crate::types::Language;
use crate::types::SearchResult;
use crate::types::TIER_PROJECT;

/// Current schema version; bumped on incompatible layout changes.
const SCHEMA_VERSION: i64 = 1;

/// RRF rank constant.
const RRF_K: f32 = 60.0;

/// Result cache capacity.
const RESULT_CACHE_CAP: usize = 500;

/// Pending-decision ceiling when none is configured.
pub const DEFAULT_MAX_PENDING_DECISIONS: usize = 100;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT UNIQUE NOT NULL,
    symbol TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    language TEXT NOT NULL,
    code TEXT NOT NULL,
    parent_header TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    symbol,
    code,
    content=chunks,
    content_rowid=id,
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, symbol, code)
    VALUES (new.id, new.symbol, new.code);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, symbol, code)
    VALUES ('delete', old.id, old.symbol, old.code);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, symbol, code)
    VALUES ('delete', old.id, old.symbol, old.code);
    INSERT INTO chunks_fts(rowid, symbol, code)
    VALUES (new.id, new.symbol, new.code);
END;

CREATE TABLE IF NOT EXISTS chunk_vectors (
    chunk_id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS timeline (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    from_ref TEXT NOT NULL,
    to_ref TEXT NOT NULL,
    summary TEXT NOT NULL,
    files_changed TEXT,
    diff_stats TEXT,
    importance TEXT NOT NULL DEFAULT 'medium',
    commit_hash TEXT,
    commit_time INTEGER,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS changelogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT UNIQUE NOT NULL,
    version TEXT,
    summary TEXT NOT NULL DEFAULT '',
    breaking_changes TEXT,
    features TEXT,
    fixes TEXT,
    commit_hash TEXT,
    commit_time INTEGER,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reasoning TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    category TEXT,
    commit_hash TEXT,
    commit_time INTEGER,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    approved_at INTEGER
);

CREATE TABLE IF NOT EXISTS approved_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    decision_id INTEGER REFERENCES decisions(id),
    category TEXT,
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    approved_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    title,
    content,
    content=approved_memory,
    content_rowid=id,
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS approved_memory_ai AFTER INSERT ON approved_memory BEGIN
    INSERT INTO memory_fts(rowid, title, content)
    VALUES (new.id, new.title, new.content);
END;

CREATE TRIGGER IF NOT EXISTS approved_memory_ad AFTER DELETE ON approved_memory BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, title, content)
    VALUES ('delete', old.id, old.title, old.content);
END;
"#;

/// Tier boosting and filtering applied at the tail of every search path.
#[derive(Debug, Clone)]
pub struct TierOptions {
    /// When false, chunks outside the `project` tier are dropped.
    pub include_deps: bool,
    /// Score multipliers per tier; unknown tiers keep their score.
    pub tier_boost: BTreeMap<String, f32>,
}

impl Default for TierOptions {
    fn default() -> Self {
        Self {
            include_deps: true,
            tier_boost: BTreeMap::from([
                ("project".to_string(), 1.0),
                ("dependency".to_string(), 0.7),
                ("stdlib".to_string(), 0.5),
            ]),
        }
    }
}

/// Hybrid search options.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    /// Weight of the dense ranking in RRF, in [0, 1].
    pub vector_weight: f32,
    /// Rewrite code-style queries into identifier terms for the lexical leg.
    pub preprocess_code: bool,
    /// Consult and fill the bounded result cache.
    pub use_cache: bool,
    pub tier: TierOptions,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            preprocess_code: false,
            use_cache: false,
            tier: TierOptions::default(),
        }
    }
}

/// Store-wide statistics for the status command.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total_chunks: i64,
    pub total_files: i64,
    pub embedded_chunks: i64,
    pub db_size_bytes: u64,
}

/// The unified persistent store.
pub struct IndexBackend {
    pub(crate) store: SqliteStore,
    db_path: PathBuf,
    writable: bool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    dimensions: i32,
    result_cache: Mutex<LruCache<String, Vec<SearchResult>>>,
}

impl std::fmt::Debug for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBackend")
            .field("db_path", &self.db_path)
            .field("writable", &self.writable)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl IndexBackend {
    /// Create a new index (or open an existing one) in writable mode with
    /// the default pending-decision ceiling.
    pub fn create(
        db_path: &Path,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        dimensions: i32,
    ) -> Result<Self> {
        Self::create_with_pending_cap(db_path, embedder, dimensions, DEFAULT_MAX_PENDING_DECISIONS)
    }

    /// Create with a custom ceiling on pending decisions; once more than
    /// `max_pending` wait, the oldest is FIFO-evicted.
    pub fn create_with_pending_cap(
        db_path: &Path,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        dimensions: i32,
        max_pending: usize,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        Self::build(db_path, true, embedder, dimensions, max_pending)
    }

    /// Open an existing index with the default pending-decision ceiling.
    ///
    /// A writable open runs schema migrations; a read-only open only
    /// verifies the schema version.
    pub fn open(
        db_path: &Path,
        writable: bool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        dimensions: i32,
    ) -> Result<Self> {
        Self::open_with_pending_cap(
            db_path,
            writable,
            embedder,
            dimensions,
            DEFAULT_MAX_PENDING_DECISIONS,
        )
    }

    /// Open with a custom ceiling on pending decisions.
    pub fn open_with_pending_cap(
        db_path: &Path,
        writable: bool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        dimensions: i32,
        max_pending: usize,
    ) -> Result<Self> {
        if !db_path.exists() {
            return Err(EngineError::io(
                db_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "index not found"),
            ));
        }
        Self::build(db_path, writable, embedder, dimensions, max_pending)
    }

    fn build(
        db_path: &Path,
        writable: bool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        dimensions: i32,
        max_pending: usize,
    ) -> Result<Self> {
        let store = SqliteStore::open(db_path)?;

        // Schema setup and version check run synchronously on the opening
        // thread; everything afterwards goes through the async path.
        let path = db_path.to_path_buf();
        store.with_conn(move |conn| {
            if writable {
                conn.execute_batch(SCHEMA).map_err(|e| EngineError::Sqlite {
                    path: path.clone(),
                    cause: format!("schema init failed: {e}"),
                })?;
                // The eviction trigger carries the configured ceiling, so it
                // is rebuilt on every writable open.
                conn.execute_batch(&fifo_trigger_sql(max_pending))
                    .map_err(|e| EngineError::Sqlite {
                        path: path.clone(),
                        cause: format!("decision trigger init failed: {e}"),
                    })?;
                conn.execute(
                    "INSERT OR IGNORE INTO schema_version (version, applied_at)
                     VALUES (?1, strftime('%s', 'now'))",
                    params![SCHEMA_VERSION],
                )?;
            }

            let version: Option<i64> = conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
                .optional()?
                .flatten();
            match version {
                Some(v) if v != SCHEMA_VERSION => Err(EngineError::IndexCorrupted {
                    path: path.clone(),
                    cause: format!(
                        "schema version {v} does not match expected {SCHEMA_VERSION}; \
                         rebuild with `codescout index --clean`"
                    ),
                }),
                None if !writable => Err(EngineError::IndexCorrupted {
                    path: path.clone(),
                    cause: "missing schema version table".to_string(),
                }),
                _ => Ok(()),
            }
        })?;

        Ok(Self {
            store,
            db_path: db_path.to_path_buf(),
            writable,
            embedder,
            dimensions,
            result_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(RESULT_CACHE_CAP).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Whether dense indexing and semantic search are active.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn dimensions(&self) -> i32 {
        self.dimensions
    }

    /// Flush and optimize. Idempotent and safe after any write.
    pub async fn seal(&self) -> Result<()> {
        self.store
            .query(|conn| {
                let mut stmt = conn.prepare("PRAGMA wal_checkpoint(TRUNCATE)")?;
                let _ = stmt.query([])?.next()?;
                let mut stmt = conn.prepare("PRAGMA optimize")?;
                let _ = stmt.query([])?.next()?;
                Ok(())
            })
            .await
    }

    /// Seal and release the handle.
    pub async fn close(self) -> Result<()> {
        self.seal().await
    }

    // ========== Chunk storage ==========

    /// Upsert a batch of chunks and their embeddings.
    ///
    /// The whole batch is embedded with one provider call before anything is
    /// written, and all rows land in a single transaction: an embedding
    /// failure leaves the store untouched, so no chunk is ever visible
    /// without its vector.
    pub async fn store_chunks_batch(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        if !self.writable {
            return Err(EngineError::NotWritable {
                operation: "store_chunks_batch".to_string(),
            });
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        for chunk in &chunks {
            if chunk.code.is_empty() || chunk.start_line < 1 || chunk.end_line < chunk.start_line {
                return Err(EngineError::Internal {
                    cause: format!("invalid chunk {}", chunk.uri()),
                });
            }
        }

        let vectors = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
                let vectors = embedder.embed_batch(&texts).await?;
                if vectors.len() != chunks.len() {
                    return Err(EngineError::Embedding {
                        cause: format!(
                            "provider returned {} vectors for {} texts",
                            vectors.len(),
                            chunks.len()
                        ),
                    });
                }
                for v in &vectors {
                    vector::check_dimension(v, self.dimensions)?;
                }
                Some(vectors)
            }
            None => None,
        };

        self.invalidate_cache();

        self.store
            .transaction(move |conn| {
                let mut ids = Vec::with_capacity(chunks.len());
                for (i, chunk) in chunks.iter().enumerate() {
                    let id = upsert_chunk(conn, chunk)?;
                    if let Some(vectors) = &vectors {
                        vector::insert_vector(conn, id, &vectors[i])?;
                    }
                    ids.push(id);
                }
                Ok(ids)
            })
            .await
    }

    /// Fetch one chunk by id.
    pub async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>> {
        self.store
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
                    params![id],
                    chunk_from_row,
                )
                .optional()
            })
            .await
    }

    /// Delete every chunk (and vector) whose id is not in `keep`.
    ///
    /// Used by compaction to reclaim superseded rows.
    pub async fn retain_chunks(&self, keep: std::collections::HashSet<ChunkId>) -> Result<usize> {
        if !self.writable {
            return Err(EngineError::NotWritable {
                operation: "retain_chunks".to_string(),
            });
        }
        self.invalidate_cache();
        self.store
            .transaction(move |conn| {
                let all: Vec<ChunkId> = {
                    let mut stmt = conn.prepare("SELECT id FROM chunks")?;
                    let rows = stmt.query_map([], |r| r.get(0))?;
                    rows.collect::<std::result::Result<_, _>>()?
                };
                let mut removed = 0;
                for id in all {
                    if !keep.contains(&id) {
                        conn.execute("DELETE FROM chunk_vectors WHERE chunk_id = ?1", params![id])?;
                        conn.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }

    // ========== Search ==========

    /// BM25-ranked lexical search over symbol and code.
    ///
    /// The query is first rewritten into a safe FTS form: identifier-like
    /// tokens, case-insensitively deduplicated, prefix-wildcarded and
    /// OR-joined, capped at 20 terms.
    pub async fn search_lexical(
        &self,
        query: &str,
        k: usize,
        tier: &TierOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(fts_query) = sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };
        let results = self.run_fts(fts_query, k).await?;
        Ok(self.apply_tier_filtering(results, k, tier))
    }

    /// Lexical search with the query passed to FTS5 verbatim.
    pub async fn search_lexical_raw(
        &self,
        query: &str,
        k: usize,
        tier: &TierOptions,
    ) -> Result<Vec<SearchResult>> {
        let results = self.run_fts(query.to_string(), k).await?;
        Ok(self.apply_tier_filtering(results, k, tier))
    }

    async fn run_fts(&self, fts_query: String, k: usize) -> Result<Vec<SearchResult>> {
        self.store
            .query(move |conn| {
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS_QUALIFIED}, bm25(chunks_fts) AS rank
                     FROM chunks_fts
                     JOIN chunks c ON c.id = chunks_fts.rowid
                     WHERE chunks_fts MATCH ?1
                     ORDER BY rank
                     LIMIT ?2"
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| EngineError::sqlite_op("prepare lexical search", e))?;
                let rows = stmt
                    .query_map(params![fts_query, k as i64], |row| {
                        let chunk = chunk_from_row(row)?;
                        let rank: f64 = row.get(11)?;

                        Ok((chunk, rank))
                    })
                    .map_err(|e| EngineError::sqlite_op("lexical search", e))?;

                let mut results = Vec::new();
                for row in rows {
                    let (chunk, rank) =
                        row.map_err(|e| EngineError::sqlite_op("read lexical row", e))?;
                    results.push(SearchResult {
                        chunk,
                        score: rank.abs() as f32 / 100.0,
                    });
                }
                Ok(results)
            })
            .await
    }

    /// Dense search: embed the query once, brute-force cosine over the
    /// vector table. Falls back to lexical search when embeddings are
    /// disabled or the provider fails.
    pub async fn search_semantic(
        &self,
        query: &str,
        k: usize,
        tier: &TierOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(embedder) = &self.embedder else {
            tracing::debug!("Semantic search requested without embeddings, using lexical");
            return self.search_lexical(query, k, tier).await;
        };

        let embedding = match embedder.embed(query).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, falling back to lexical");
                return self.search_lexical(query, k, tier).await;
            }
        };
        vector::check_dimension(&embedding, self.dimensions)?;

        let hits = self
            .store
            .query(move |conn| vector::search_top_k(conn, &embedding, k))
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ChunkId> = hits.iter().map(|(id, _)| *id).collect();
        let chunks = self.fetch_chunks(ids).await?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            if let Some(chunk) = chunks.get(&id) {
                results.push(SearchResult {
                    chunk: chunk.clone(),
                    score,
                });
            }
        }
        Ok(self.apply_tier_filtering(results, k, tier))
    }

    /// Hybrid retrieval via Reciprocal Rank Fusion.
    ///
    /// Fetches `3k` candidates from the lexical and dense paths
    /// concurrently and fuses them with
    /// `score(c) = Σ wᵢ / (60 + rankᵢ(c))` where the dense list carries
    /// `vector_weight` and the lexical list `1 - vector_weight`.
    pub async fn search_hybrid(
        &self,
        query: &str,
        k: usize,
        opts: &HybridOptions,
    ) -> Result<Vec<SearchResult>> {
        let cache_key = format!(
            "{query}:{k}:{}:{}",
            opts.vector_weight, opts.preprocess_code
        );
        if opts.use_cache {
            if let Some(hit) = self.result_cache.lock().ok().and_then(|mut c| {
                c.get(&cache_key).cloned()
            }) {
                return Ok(hit);
            }
        }

        // The dense leg embeds the raw query; the lexical leg benefits from
        // identifier extraction when the query is itself code.
        let lexical_query = if opts.preprocess_code {
            preprocess_code_query(query)
        } else {
            query.to_string()
        };

        let results = if self.embedder.is_none() {
            self.search_lexical(&lexical_query, k, &opts.tier).await?
        } else {
            let fetch_k = k * 3;
            let unboosted = TierOptions {
                include_deps: true,
                tier_boost: BTreeMap::new(),
            };
            let (semantic, lexical) = tokio::join!(
                self.search_semantic(query, fetch_k, &unboosted),
                self.search_lexical(&lexical_query, fetch_k, &unboosted),
            );
            let fused = fuse_rrf(semantic?, lexical?, opts.vector_weight);
            self.apply_tier_filtering(fused, k, &opts.tier)
        };

        if opts.use_cache {
            if let Ok(mut cache) = self.result_cache.lock() {
                cache.put(cache_key, results.clone());
            }
        }
        Ok(results)
    }

    /// Chunk-level hybrid retrieval aggregated per file.
    pub async fn search_files(
        &self,
        query: &str,
        k: usize,
        opts: &HybridOptions,
        aggregation: Aggregation,
    ) -> Result<Vec<FileSearchResult>> {
        let chunk_results = self.search_hybrid(query, k * 5, opts).await?;

        let mut per_file: HashMap<PathBuf, Vec<f32>> = HashMap::new();
        for result in chunk_results {
            per_file
                .entry(result.chunk.file_path.clone())
                .or_default()
                .push(result.score);
        }

        let mut ranked: Vec<FileSearchResult> = per_file
            .into_iter()
            .map(|(file_path, scores)| {
                let score = match aggregation {
                    Aggregation::Max => scores.iter().copied().fold(f32::MIN, f32::max),
                    Aggregation::Sum => scores.iter().sum(),
                };
                FileSearchResult { file_path, score }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Tier boosting and filtering, the tail of every search path.
    ///
    /// Multiplies each score by the boost of its chunk's tier, optionally
    /// drops non-project tiers, re-sorts and truncates to `k`.
    pub fn apply_tier_filtering(
        &self,
        mut results: Vec<SearchResult>,
        k: usize,
        tier: &TierOptions,
    ) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }

        for result in &mut results {
            if let Some(boost) = tier.tier_boost.get(result.chunk.tier()) {
                result.score *= boost;
            }
        }
        if !tier.include_deps {
            results.retain(|r| r.chunk.tier() == TIER_PROJECT);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(k);
        results
    }

    /// Store-wide statistics.
    pub async fn stats(&self) -> Result<IndexStats> {
        let db_size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        self.store
            .query(move |conn| {
                let total_chunks: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
                let total_files: i64 = conn.query_row(
                    "SELECT COUNT(DISTINCT file_path) FROM chunks",
                    [],
                    |r| r.get(0),
                )?;
                let embedded_chunks: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunk_vectors", [], |r| r.get(0))?;
                Ok(IndexStats {
                    total_chunks,
                    total_files,
                    embedded_chunks,
                    db_size_bytes,
                })
            })
            .await
    }

    async fn fetch_chunks(&self, ids: Vec<ChunkId>) -> Result<HashMap<ChunkId, Chunk>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.store
            .query(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(",");
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE id IN ({placeholders})"
                );
                let mut stmt = stmt_or(conn.prepare(&sql), "prepare chunk fetch")?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(ids.iter()), chunk_from_row)
                    .map_err(|e| EngineError::sqlite_op("chunk fetch", e))?;

                let mut map = HashMap::new();
                for row in rows {
                    let chunk = row.map_err(|e| EngineError::sqlite_op("read chunk", e))?;
                    if let Some(id) = chunk.id {
                        map.insert(id, chunk);
                    }
                }
                Ok(map)
            })
            .await
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.result_cache.lock() {
            cache.clear();
        }
    }
}

fn stmt_or<'a>(
    r: std::result::Result<rusqlite::Statement<'a>, rusqlite::Error>,
    op: &str,
) -> Result<rusqlite::Statement<'a>> {
    r.map_err(|e| EngineError::sqlite_op(op, e))
}

/// Column list shared by every chunk-reading query.
const CHUNK_COLUMNS: &str =
    "id, symbol, chunk_type, file_path, start_line, end_line, language, code, parent_header, \
     metadata, created_at";
const CHUNK_COLUMNS_QUALIFIED: &str =
    "c.id, c.symbol, c.chunk_type, c.file_path, c.start_line, c.end_line, c.language, c.code, \
     c.parent_header, c.metadata, c.created_at";

fn chunk_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Chunk, rusqlite::Error> {
    let chunk_type: String = row.get(2)?;
    let file_path: String = row.get(3)?;
    let language: String = row.get(6)?;
    let metadata: Option<String> = row.get(9)?;
    let metadata = metadata
        .and_then(|m| serde_json::from_str(&m).ok())
        .unwrap_or_default();

    Ok(Chunk {
        id: Some(row.get(0)?),
        symbol: row.get(1)?,
        chunk_type: ChunkType::parse(&chunk_type),
        language: Language::parse(&language),
        file_path: PathBuf::from(file_path),
        start_line: row.get(4)?,
        end_line: row.get(5)?,
        code: row.get(7)?,
        parent_header: row.get(8)?,
        metadata,
        created_at: row.get(10)?,
    })
}

/// FIFO-eviction trigger for pending decisions at the given ceiling.
fn fifo_trigger_sql(max_pending: usize) -> String {
    format!(
        "DROP TRIGGER IF EXISTS decisions_fifo;
         CREATE TRIGGER decisions_fifo
         AFTER INSERT ON decisions
         WHEN (SELECT COUNT(*) FROM decisions WHERE status = 'pending') > {max_pending}
         BEGIN
             DELETE FROM decisions
             WHERE id = (
                 SELECT id FROM decisions
                 WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
             );
         END;"
    )
}

/// Insert or replace a chunk, preserving the id of an existing uri.
fn upsert_chunk(conn: &Connection, chunk: &Chunk) -> Result<ChunkId> {
    let uri = chunk.uri();
    let metadata = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());
    let file_path = chunk.file_path.to_string_lossy();

    let existing: Option<ChunkId> = conn
        .query_row("SELECT id FROM chunks WHERE uri = ?1", params![uri], |r| {
            r.get(0)
        })
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO chunks
                 (uri, symbol, chunk_type, file_path, start_line, end_line, language, code,
                  parent_header, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    uri,
                    chunk.symbol,
                    chunk.chunk_type.as_str(),
                    file_path,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.language.as_str(),
                    chunk.code,
                    chunk.parent_header,
                    metadata,
                ],
            )
            .map_err(|e| EngineError::sqlite_op("insert chunk", e))?;
            Ok(conn.last_insert_rowid())
        }
        Some(id) => {
            // Delete + re-insert with the same id instead of UPDATE so the
            // FTS triggers see a clean delete/insert pair.
            conn.execute("DELETE FROM chunks WHERE id = ?1", params![id])
                .map_err(|e| EngineError::sqlite_op("delete superseded chunk", e))?;
            conn.execute(
                "INSERT INTO chunks
                 (id, uri, symbol, chunk_type, file_path, start_line, end_line, language, code,
                  parent_header, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    uri,
                    chunk.symbol,
                    chunk.chunk_type.as_str(),
                    file_path,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.language.as_str(),
                    chunk.code,
                    chunk.parent_header,
                    metadata,
                ],
            )
            .map_err(|e| EngineError::sqlite_op("reinsert chunk", e))?;
            Ok(id)
        }
    }
}

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").expect("identifier regex"));

/// Rewrite a free-form query into a safe FTS5 expression.
///
/// Extracts identifier-like tokens (>= 3 chars), deduplicates them
/// case-insensitively preserving order, appends a prefix wildcard to each,
/// joins with OR and caps at 20 terms. Returns `None` when nothing
/// identifier-like remains.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();
    for m in IDENT_RE.find_iter(query) {
        let token = m.as_str();
        if seen.insert(token.to_lowercase()) {
            tokens.push(format!("{token}*"));
        }
        if tokens.len() == 20 {
            break;
        }
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// Reciprocal Rank Fusion of a dense and a lexical ranking.
///
/// Ranks are 1-based: the top result of a list contributes `w / (60 + 1)`.
fn fuse_rrf(
    semantic: Vec<SearchResult>,
    lexical: Vec<SearchResult>,
    vector_weight: f32,
) -> Vec<SearchResult> {
    let mut scores: HashMap<ChunkId, (f32, Chunk)> = HashMap::new();

    for (rank, result) in semantic.into_iter().enumerate() {
        let Some(id) = result.chunk.id else { continue };
        let contribution = vector_weight / (RRF_K + (rank + 1) as f32);
        scores
            .entry(id)
            .and_modify(|(s, _)| *s += contribution)
            .or_insert((contribution, result.chunk));
    }

    let lexical_weight = 1.0 - vector_weight;
    for (rank, result) in lexical.into_iter().enumerate() {
        let Some(id) = result.chunk.id else { continue };
        let contribution = lexical_weight / (RRF_K + (rank + 1) as f32);
        scores
            .entry(id)
            .and_modify(|(s, _)| *s += contribution)
            .or_insert((contribution, result.chunk));
    }

    let mut fused: Vec<(ChunkId, f32, Chunk)> = scores
        .into_iter()
        .map(|(id, (score, chunk))| (id, score, chunk))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    fused
        .into_iter()
        .map(|(_, score, chunk)| SearchResult { chunk, score })
        .collect()
}
