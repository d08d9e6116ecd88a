//! Structure-aligned chunking.

pub mod cast;

pub use cast::CastChunker;
pub use cast::CastConfig;
