//! Search façade over the storage backend.
//!
//! Dispatches on search mode, filters out chunks the staleness ledger marks
//! superseded, applies configured tier boosting and shapes results with a
//! display snippet.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::ChunkIndex;
use crate::config::SearchSettings;
use crate::error::Result;
use crate::storage::HybridOptions;
use crate::storage::IndexBackend;
use crate::storage::TierOptions;
use crate::types::Aggregation;
use crate::types::Chunk;
use crate::types::FileSearchResult;
use crate::types::SearchMode;
use crate::types::SearchResult;

/// A shaped search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    /// First line of the chunk matching a query term, for display.
    pub snippet: Option<String>,
}

/// Thin façade combining backend search with result shaping.
pub struct SearchEngine {
    backend: Arc<IndexBackend>,
    settings: SearchSettings,
    /// Ids of currently-valid chunks; `None` disables filtering.
    valid_filter: Option<HashSet<String>>,
    /// Decompose code-style queries into identifier terms before the
    /// lexical leg runs.
    preprocess_code: bool,
}

impl SearchEngine {
    pub fn new(backend: Arc<IndexBackend>, settings: SearchSettings) -> Self {
        Self {
            backend,
            settings,
            valid_filter: None,
            preprocess_code: false,
        }
    }

    /// Treat queries as code snippets (identifier extraction before the
    /// lexical search).
    pub fn with_code_preprocessing(mut self) -> Self {
        self.preprocess_code = true;
        self
    }

    /// Filter results down to chunks the ledger still considers valid.
    pub fn with_chunk_index(mut self, index: &ChunkIndex) -> Self {
        let valid = index.valid_chunks();
        // An empty ledger means the index was never tracked; filtering
        // against it would hide everything.
        if !valid.is_empty() {
            self.valid_filter = Some(valid);
        }
        self
    }

    /// Remove any staleness filtering (`--no-filter`).
    pub fn without_filter(mut self) -> Self {
        self.valid_filter = None;
        self
    }

    fn tier_options(&self) -> TierOptions {
        TierOptions {
            include_deps: self.settings.include_dependencies,
            tier_boost: self.settings.tier_boost.clone(),
        }
    }

    /// Run a query in the given mode.
    ///
    /// `raw` passes the query to the text index verbatim instead of
    /// sanitising it (the `--regex` CLI flag).
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        k: usize,
        raw: bool,
    ) -> Result<Vec<SearchHit>> {
        let tier = self.tier_options();
        // Over-fetch when a staleness filter may drop results.
        let fetch_k = if self.valid_filter.is_some() { k * 2 } else { k };

        let results = match mode {
            SearchMode::Lexical if raw => {
                self.backend.search_lexical_raw(query, fetch_k, &tier).await?
            }
            SearchMode::Lexical => {
                let lexical_query = if self.preprocess_code {
                    crate::search::query::preprocess_code_query(query)
                } else {
                    query.to_string()
                };
                self.backend
                    .search_lexical(&lexical_query, fetch_k, &tier)
                    .await?
            }
            SearchMode::Semantic => self.backend.search_semantic(query, fetch_k, &tier).await?,
            SearchMode::Hybrid => {
                let opts = HybridOptions {
                    vector_weight: self.settings.vector_weight,
                    preprocess_code: self.preprocess_code,
                    use_cache: true,
                    tier,
                };
                self.backend.search_hybrid(query, fetch_k, &opts).await?
            }
        };

        let filtered = self.apply_valid_filter(results);
        Ok(filtered
            .into_iter()
            .take(k)
            .map(|r| shape_hit(r, query))
            .collect())
    }

    /// File-level search: hybrid chunk retrieval aggregated per file.
    pub async fn search_files(
        &self,
        query: &str,
        k: usize,
        aggregation: Aggregation,
    ) -> Result<Vec<FileSearchResult>> {
        let opts = HybridOptions {
            vector_weight: self.settings.vector_weight,
            preprocess_code: self.preprocess_code,
            use_cache: true,
            tier: self.tier_options(),
        };
        self.backend.search_files(query, k, &opts, aggregation).await
    }

    fn apply_valid_filter(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let Some(valid) = &self.valid_filter else {
            return results;
        };
        results
            .into_iter()
            .filter(|r| match r.chunk.id {
                Some(id) => valid.contains(&id.to_string()),
                None => true,
            })
            .collect()
    }
}

fn shape_hit(result: SearchResult, query: &str) -> SearchHit {
    let snippet = make_snippet(&result.chunk.code, query);
    SearchHit {
        chunk: result.chunk,
        score: result.score,
        snippet,
    }
}

/// First non-empty line containing a query term, else the first non-empty
/// line.
fn make_snippet(code: &str, query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .collect();

    let mut first_line = None;
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if first_line.is_none() {
            first_line = Some(trimmed.to_string());
        }
        let lower = trimmed.to_lowercase();
        if terms.iter().any(|t| lower.contains(t)) {
            return Some(trimmed.to_string());
        }
    }
    first_line
}
