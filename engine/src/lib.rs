//! codescout engine
//!
//! Local-first code intelligence: ingest a source tree, break it into
//! structure-aligned chunks, persist them in a hybrid lexical + dense
//! SQLite store, and answer single-shot and multi-hop queries against it.
//!
//! ## Subsystems
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `parse` | tree-sitter parsing and concept extraction |
//! | `chunking` | syntax-aligned split/merge chunking |
//! | `cache` | file-hash cache and chunk staleness ledger |
//! | `storage` | SQLite backend: chunks, FTS5, vectors, memory tables |
//! | `indexing` | discovery, batching, incremental updates, compaction |
//! | `search` | lexical / semantic / hybrid search and multi-hop research |
//! | `embeddings` | embedding provider trait, HTTP and daemon producers |
//! | `memory` | git history mirroring and the shared export format |

// Core modules
pub mod config;
pub mod error;
pub mod types;

mod jsonio;

// Subsystems
pub mod cache;
pub mod chunking;
pub mod embeddings;
pub mod indexing;
pub mod memory;
pub mod parse;
pub mod search;
pub mod storage;

// Re-exports
pub use cache::ChunkIndex;
pub use cache::HashCache;
pub use chunking::CastChunker;
pub use chunking::CastConfig;
pub use config::Config;
pub use error::EngineError;
pub use error::Result;
pub use indexing::IndexingCoordinator;
pub use indexing::IndexingStats;
pub use parse::ParseEngine;
pub use search::MultiHopResearcher;
pub use search::ResearchOptions;
pub use search::SearchEngine;
pub use search::SearchHit;
pub use storage::HybridOptions;
pub use storage::IndexBackend;
pub use storage::TierOptions;
pub use types::Aggregation;
pub use types::Chunk;
pub use types::ChunkId;
pub use types::ChunkType;
pub use types::FileSearchResult;
pub use types::Language;
pub use types::SearchMode;
pub use types::SearchResult;
