//! Multi-hop code research.
//!
//! Expands an initial result set by extracting code identifiers from the
//! chunks found so far, re-querying the index for each, and recording the
//! relationships that the expansion uncovers. The frontier is bounded by
//! `max_hops`, a per-entity result cap and a hard total-chunk cap; a
//! visited-entity set prevents revisits, so cyclic identifier graphs
//! terminate.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::error::Result;
use crate::search::query::extract_entities;
use crate::search::query::preprocess_natural_language;
use crate::storage::IndexBackend;
use crate::storage::TierOptions;
use crate::types::Chunk;
use crate::types::ChunkId;
use crate::types::Relationship;
use crate::types::RelationshipType;

/// Bounds for one research run.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    /// Expansion hops after the initial search.
    pub max_hops: i32,
    /// Result cap for the initial search and for each entity query.
    pub max_results_per_hop: usize,
    /// Hard cap on the total chunk set.
    pub max_total_chunks: usize,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_results_per_hop: 10,
            max_total_chunks: 50,
        }
    }
}

/// Outcome of a research run.
#[derive(Debug, Clone)]
pub struct ResearchResult {
    pub question: String,
    pub chunks: Vec<Chunk>,
    pub relationships: Vec<Relationship>,
    pub hops_executed: i32,
    pub total_entities_found: usize,
}

/// One outgoing edge in the derived call graph.
#[derive(Debug, Clone, Serialize)]
pub struct CallEdge {
    pub target: String,
    pub relationship_type: RelationshipType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<ChunkId>,
}

/// Bounded-frontier researcher over the index.
pub struct MultiHopResearcher {
    backend: Arc<IndexBackend>,
    options: ResearchOptions,
}

impl MultiHopResearcher {
    pub fn new(backend: Arc<IndexBackend>, options: ResearchOptions) -> Self {
        Self { backend, options }
    }

    /// Answer a question by bounded expansion from an initial result set.
    pub async fn research(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<ResearchResult> {
        let tier = TierOptions::default();

        // Hop 0: semantic when the dense index is live, otherwise
        // preprocessed lexical.
        let seeds = if self.backend.has_embedder() {
            self.backend
                .search_semantic(question, self.options.max_results_per_hop, &tier)
                .await?
        } else {
            let processed = preprocess_natural_language(question);
            self.backend
                .search_lexical(&processed, self.options.max_results_per_hop, &tier)
                .await?
        };

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut chunk_ids: HashSet<ChunkId> = HashSet::new();
        for result in seeds {
            if let Some(id) = result.chunk.id {
                if chunk_ids.insert(id) {
                    chunks.push(result.chunk);
                }
            }
        }

        let mut relationships: Vec<Relationship> = Vec::new();
        let mut visited_entities: HashSet<String> = HashSet::new();
        let mut total_entities = 0usize;
        let mut hops_executed = 0;

        if chunks.is_empty() {
            return Ok(ResearchResult {
                question: question.to_string(),
                chunks,
                relationships,
                hops_executed,
                total_entities_found: 0,
            });
        }

        // Chunks added in the previous hop form the frontier.
        let mut frontier: Vec<Chunk> = chunks.clone();

        for _hop in 1..=self.options.max_hops {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if chunks.len() >= self.options.max_total_chunks {
                break;
            }

            // Gather unvisited entities from the frontier, remembering
            // which chunk surfaced each one.
            let mut candidates: Vec<(String, Chunk)> = Vec::new();
            for chunk in &frontier {
                for entity in extract_entities(&chunk.symbol, &chunk.code) {
                    if visited_entities.insert(entity.clone()) {
                        candidates.push((entity, chunk.clone()));
                    }
                }
            }
            total_entities += candidates.len();

            if candidates.is_empty() {
                break;
            }

            let mut added_this_hop: Vec<Chunk> = Vec::new();
            for (entity, seed_chunk) in candidates {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                if chunks.len() + added_this_hop.len() >= self.options.max_total_chunks {
                    break;
                }

                let found = self
                    .backend
                    .search_lexical(&entity, self.options.max_results_per_hop, &tier)
                    .await?;

                for result in found {
                    let Some(id) = result.chunk.id else { continue };
                    if !chunk_ids.insert(id) {
                        continue;
                    }

                    relationships.push(Relationship {
                        from_entity: seed_chunk.symbol.clone(),
                        to_entity: entity.clone(),
                        relationship_type: infer_relationship_type(&seed_chunk, &result.chunk),
                        from_chunk: seed_chunk.id,
                        to_chunk: Some(id),
                    });
                    added_this_hop.push(result.chunk);

                    if chunks.len() + added_this_hop.len() >= self.options.max_total_chunks {
                        break;
                    }
                }
            }

            hops_executed += 1;

            if added_this_hop.is_empty() {
                break;
            }
            chunks.extend(added_this_hop.iter().cloned());
            frontier = added_this_hop;
        }

        chunks.truncate(self.options.max_total_chunks);

        Ok(ResearchResult {
            question: question.to_string(),
            chunks,
            relationships,
            hops_executed,
            total_entities_found: total_entities,
        })
    }

    /// Adjacency view of the discovered relationships.
    pub fn build_call_graph(
        relationships: &[Relationship],
    ) -> BTreeMap<String, Vec<CallEdge>> {
        let mut graph: BTreeMap<String, Vec<CallEdge>> = BTreeMap::new();
        for rel in relationships {
            graph
                .entry(rel.from_entity.clone())
                .or_default()
                .push(CallEdge {
                    target: rel.to_entity.clone(),
                    relationship_type: rel.relationship_type,
                    chunk_id: rel.to_chunk,
                });
        }
        graph
    }

    /// Entities that appear only as sources, never as targets.
    ///
    /// A purely cyclic component has no entry points.
    pub fn get_entry_points(relationships: &[Relationship]) -> Vec<String> {
        let targets: HashSet<&str> = relationships
            .iter()
            .map(|r| r.to_entity.as_str())
            .collect();

        let mut entry_points: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for rel in relationships {
            let from = rel.from_entity.as_str();
            if !targets.contains(from) && seen.insert(from) {
                entry_points.push(from.to_string());
            }
        }
        entry_points
    }
}

/// Classify the edge between a seed chunk and a discovered target.
///
/// `function_call` when the target symbol is called in the seed's code,
/// `inheritance` when the reference sits in a class-header context, else
/// `reference`.
fn infer_relationship_type(seed: &Chunk, target: &Chunk) -> RelationshipType {
    let symbol = target.symbol.as_str();
    if symbol.is_empty() {
        return RelationshipType::Reference;
    }

    for line in seed.code.lines() {
        let Some(pos) = line.find(symbol) else { continue };

        let rest = &line[pos + symbol.len()..];
        let is_call = rest.trim_start().starts_with('(');
        let in_class_header = line.contains("class ")
            || line.contains("extends ")
            || line.contains("implements ")
            || line.contains("impl ");

        if in_class_header && !is_call {
            return RelationshipType::Inheritance;
        }
        if is_call && !line.trim_start().starts_with("def ") && !in_class_header {
            return RelationshipType::FunctionCall;
        }
    }
    RelationshipType::Reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;
    use crate::types::Language;
    use std::path::PathBuf;

    fn make_chunk(symbol: &str, path: &str, code: &str) -> Chunk {
        Chunk {
            id: None,
            symbol: symbol.to_string(),
            chunk_type: ChunkType::Function,
            language: Language::Python,
            file_path: PathBuf::from(path),
            start_line: 1,
            end_line: code.lines().count().max(1) as i32,
            code: code.to_string(),
            parent_header: None,
            metadata: Default::default(),
            created_at: None,
        }
    }

    fn rel(from: &str, to: &str) -> Relationship {
        Relationship {
            from_entity: from.to_string(),
            to_entity: to.to_string(),
            relationship_type: RelationshipType::FunctionCall,
            from_chunk: None,
            to_chunk: None,
        }
    }

    async fn seeded_backend(dir: &tempfile::TempDir) -> Arc<IndexBackend> {
        let backend = IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap();
        backend
            .store_chunks_batch(vec![
                make_chunk(
                    "load_config",
                    "app/config.py",
                    "def load_config():\n    raw = read_file('config.json')\n    return raw",
                ),
                make_chunk(
                    "read_file",
                    "app/io.py",
                    "def read_file(path):\n    data = open(path).read()\n    return parse_json(data)",
                ),
                make_chunk(
                    "parse_json",
                    "app/json_util.py",
                    "def parse_json(text):\n    return json.loads(text)",
                ),
            ])
            .await
            .unwrap();
        Arc::new(backend)
    }

    #[tokio::test]
    async fn test_research_expands_through_call_chain() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir).await;
        let researcher = MultiHopResearcher::new(backend, ResearchOptions::default());

        let result = researcher
            .research(
                "How does configuration loading work?",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let symbols: Vec<&str> = result.chunks.iter().map(|c| c.symbol.as_str()).collect();
        assert!(symbols.contains(&"load_config"));
        assert!(symbols.contains(&"read_file"));
        assert!(symbols.contains(&"parse_json"));
        assert!(result.hops_executed <= 2);
        assert!(result.total_entities_found > 0);
    }

    #[tokio::test]
    async fn test_research_zero_hops_is_initial_search_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir).await;
        let researcher = MultiHopResearcher::new(
            backend,
            ResearchOptions {
                max_hops: 0,
                ..ResearchOptions::default()
            },
        );

        let result = researcher
            .research("load_config", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.hops_executed, 0);
        assert!(result.relationships.is_empty());
        assert!(!result.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_research_respects_total_chunk_cap() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir).await;
        let researcher = MultiHopResearcher::new(
            backend,
            ResearchOptions {
                max_hops: 10,
                max_results_per_hop: 5,
                max_total_chunks: 2,
            },
        );

        let result = researcher
            .research("load_config", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.chunks.len() <= 2);
    }

    #[tokio::test]
    async fn test_research_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap());
        let researcher = MultiHopResearcher::new(backend, ResearchOptions::default());

        let result = researcher
            .research("nonexistent_function_xyz", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.chunks.is_empty());
        assert!(result.relationships.is_empty());
        assert_eq!(result.hops_executed, 0);
    }

    #[tokio::test]
    async fn test_research_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir).await;
        let researcher = MultiHopResearcher::new(backend, ResearchOptions::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = researcher.research("load_config", &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_build_call_graph() {
        let relationships = vec![
            rel("main", "load_config"),
            rel("main", "fetch_data"),
            rel("fetch_data", "parse_response"),
        ];

        let graph = MultiHopResearcher::build_call_graph(&relationships);
        assert_eq!(graph["main"].len(), 2);
        let targets: HashSet<&str> =
            graph["main"].iter().map(|e| e.target.as_str()).collect();
        assert!(targets.contains("load_config"));
        assert!(targets.contains("fetch_data"));
        assert_eq!(graph["fetch_data"][0].target, "parse_response");
    }

    #[test]
    fn test_build_call_graph_empty() {
        assert!(MultiHopResearcher::build_call_graph(&[]).is_empty());
    }

    #[test]
    fn test_entry_points() {
        let relationships = vec![
            rel("main", "helper"),
            rel("test_main", "helper"),
            rel("helper", "util"),
        ];

        let entries = MultiHopResearcher::get_entry_points(&relationships);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&"main".to_string()));
        assert!(entries.contains(&"test_main".to_string()));
    }

    #[test]
    fn test_entry_points_cycle_is_empty() {
        let relationships = vec![rel("A", "B"), rel("B", "C"), rel("C", "A")];
        assert!(MultiHopResearcher::get_entry_points(&relationships).is_empty());
    }

    #[test]
    fn test_infer_relationship_type() {
        let caller = make_chunk("main", "m.py", "def main():\n    load_config()\n");
        let callee = make_chunk("load_config", "c.py", "def load_config(): pass");
        assert_eq!(
            infer_relationship_type(&caller, &callee),
            RelationshipType::FunctionCall
        );

        let subclass = make_chunk("Child", "s.py", "class Child(Base):\n    pass\n");
        let base = make_chunk("Base", "b.py", "class Base: pass");
        assert_eq!(
            infer_relationship_type(&subclass, &base),
            RelationshipType::Inheritance
        );

        let referencer = make_chunk("doc", "d.py", "# see helper_value for details\n");
        let target = make_chunk("helper_value", "h.py", "helper_value = 3");
        assert_eq!(
            infer_relationship_type(&referencer, &target),
            RelationshipType::Reference
        );
    }
}
