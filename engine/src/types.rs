//! Core data types for the engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Store-assigned chunk identifier.
///
/// Stable across re-indexing: the backend keys chunks by
/// `"{file_path}:{start_line}-{end_line}"` and preserves the integer id on
/// upsert.
pub type ChunkId = i64;

/// Kind of code chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Comment,
    Block,
    Unknown,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Class => "class",
            ChunkType::Comment => "comment",
            ChunkType::Block => "block",
            ChunkType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> ChunkType {
        match s {
            "function" => ChunkType::Function,
            "method" => ChunkType::Method,
            "class" => ChunkType::Class,
            "comment" => ChunkType::Comment,
            "block" => ChunkType::Block,
            _ => ChunkType::Unknown,
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported programming languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Unknown,
}

impl Language {
    /// Map a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Language {
        match ext {
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            _ => Language::Unknown,
        }
    }

    /// Detect the language of a path from its extension.
    pub fn from_path(path: &Path) -> Language {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Language {
        match s {
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "go" => Language::Go,
            "rust" => Language::Rust,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "csharp" => Language::CSharp,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            _ => Language::Unknown,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata key carrying the provenance tier of a chunk.
pub const METADATA_TIER: &str = "tier";
/// Default tier when a chunk carries none.
pub const TIER_PROJECT: &str = "project";

/// Code chunk - the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Store-assigned id; `None` until persisted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<ChunkId>,
    /// Named entity, or a synthetic `"name.partN"` / `"a+b"` for
    /// split/merged chunks.
    pub symbol: String,
    pub chunk_type: ChunkType,
    pub language: Language,
    pub file_path: PathBuf,
    /// 1-indexed, inclusive.
    pub start_line: i32,
    /// 1-indexed, inclusive; always >= start_line.
    pub end_line: i32,
    /// Chunk content; never empty for persisted chunks.
    pub code: String,
    /// Name of the nearest enclosing class or module, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_header: Option<String>,
    /// Free-form metadata; reserved keys: `tier`, `package_name`,
    /// `package_version`.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Unix timestamp assigned by the store.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<i64>,
}

impl Chunk {
    /// Stable identity key: same span in the same file keeps the same id
    /// across re-indexing.
    pub fn uri(&self) -> String {
        format!(
            "{}:{}-{}",
            self.file_path.display(),
            self.start_line,
            self.end_line
        )
    }

    /// Chunk size in characters, the unit all chunking limits use.
    pub fn size(&self) -> usize {
        self.code.chars().count()
    }

    /// Provenance tier, defaulting to `project`.
    pub fn tier(&self) -> &str {
        self.metadata
            .get(METADATA_TIER)
            .map(String::as_str)
            .unwrap_or(TIER_PROJECT)
    }

    /// Text handed to the embedding producer for this chunk.
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.symbol, self.code)
    }
}

/// Search result with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// File-level search result from chunk score aggregation.
#[derive(Debug, Clone)]
pub struct FileSearchResult {
    pub file_path: PathBuf,
    pub score: f32,
}

/// Chunk-score aggregation strategy for file-level search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Sum,
    Max,
}

/// Search mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Lexical,
    Semantic,
    #[default]
    Hybrid,
}

/// Kind of a derived code relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    FunctionCall,
    Inheritance,
    Reference,
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelationshipType::FunctionCall => "function_call",
            RelationshipType::Inheritance => "inheritance",
            RelationshipType::Reference => "reference",
        };
        f.write_str(s)
    }
}

/// Relationship between two code entities, derived during multi-hop
/// research. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub from_entity: String,
    pub to_entity: String,
    pub relationship_type: RelationshipType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_chunk: Option<ChunkId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_chunk: Option<ChunkId>,
}

/// Content hash used for change detection: SHA256 truncated to 16 hex chars.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")[..16].to_string()
}
