//! Syntax-tree parsing and concept extraction.

pub mod concepts;
pub mod engine;

pub use concepts::ConceptExtractor;
pub use concepts::ConceptKind;
pub use concepts::UniversalConcept;
pub use engine::ParseEngine;
