//! Change-detection caches backing incremental indexing.

pub mod chunk_index;
pub mod hash_cache;

pub use chunk_index::ChunkIndex;
pub use chunk_index::ChunkStatus;
pub use chunk_index::StalenessSummary;
pub use hash_cache::FileHashRecord;
pub use hash_cache::HashCache;
