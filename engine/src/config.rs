//! Configuration for the engine.
//!
//! Persisted as `config.json` inside the per-project `.codescout/`
//! directory. Every field has a serde default so partial configs load
//! cleanly.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::jsonio;

/// Name of the per-project data directory.
pub const PROJECT_DIR: &str = ".codescout";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub indexing: IndexingSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub dependencies: DependencySettings,
    #[serde(default)]
    pub documentation: DocumentationSettings,
    #[serde(default)]
    pub adaptive: AdaptiveSettings,
    #[serde(default)]
    pub memory: MemorySettings,
}

/// Embedding producer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSettings {
    /// Toggles dense indexing and semantic search end-to-end.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Model identifier passed to the embedding producer.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Environment variable holding the API key. When embeddings are
    /// enabled but the variable is empty, embeddings self-disable.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Expected vector dimension; must match the model.
    #[serde(default = "default_dimensions")]
    pub dimensions: i32,
    /// Override the provider API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Unix socket of a local embedding daemon; takes precedence over the
    /// HTTP provider when set.
    #[serde(default)]
    pub daemon_socket: Option<PathBuf>,
    /// Request timeout in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            dimensions: default_dimensions(),
            base_url: None,
            daemon_socket: None,
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_embedding_model() -> String {
    "openai-small".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_dimensions() -> i32 {
    1536
}
fn default_embed_timeout_secs() -> u64 {
    30
}

/// Indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingSettings {
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// Per-file size ceiling in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: i32,
    /// Chunks accumulated before a batched store call.
    #[serde(default = "default_chunk_batch_size")]
    pub chunk_batch_size: usize,
    /// Soft per-file parse timeout in seconds.
    #[serde(default = "default_parse_timeout_secs")]
    pub parse_timeout_secs: u64,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size_mb: default_max_file_size_mb(),
            chunk_batch_size: default_chunk_batch_size(),
            parse_timeout_secs: default_parse_timeout_secs(),
        }
    }
}

fn default_include_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_exclude_patterns() -> Vec<String> {
    Vec::new()
}
fn default_max_file_size_mb() -> i32 {
    5
}
fn default_chunk_batch_size() -> usize {
    500
}
fn default_parse_timeout_secs() -> u64 {
    30
}

/// cAST chunking settings; sizes in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingSettings {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    /// Merge budget as a ratio of `max_chunk_size`, in [0, 1].
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    #[serde(default = "default_true")]
    pub greedy_merge: bool,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            merge_threshold: default_merge_threshold(),
            greedy_merge: true,
        }
    }
}

fn default_max_chunk_size() -> usize {
    1200
}
fn default_min_chunk_size() -> usize {
    50
}
fn default_merge_threshold() -> f32 {
    0.8
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSettings {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Weight of the dense ranking in hybrid fusion, in [0, 1].
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Score multipliers per provenance tier.
    #[serde(default = "default_tier_boost")]
    pub tier_boost: BTreeMap<String, f32>,
    #[serde(default = "default_true")]
    pub include_dependencies: bool,
    #[serde(default = "default_true")]
    pub multi_hop_enabled: bool,
    #[serde(default = "default_max_hops")]
    pub max_hops: i32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            vector_weight: default_vector_weight(),
            tier_boost: default_tier_boost(),
            include_dependencies: true,
            multi_hop_enabled: true,
            max_hops: default_max_hops(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_max_hops() -> i32 {
    2
}
fn default_tier_boost() -> BTreeMap<String, f32> {
    BTreeMap::from([
        ("project".to_string(), 1.0),
        ("dependency".to_string(), 0.7),
        ("stdlib".to_string(), 0.5),
    ])
}

/// Dependency indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also index type stubs (`.pyi`, `.d.ts`).
    #[serde(default = "default_true")]
    pub index_stubs: bool,
    #[serde(default = "default_dependency_languages")]
    pub languages: Vec<String>,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            index_stubs: true,
            languages: default_dependency_languages(),
        }
    }
}

fn default_dependency_languages() -> Vec<String> {
    vec![
        "python".to_string(),
        "typescript".to_string(),
        "javascript".to_string(),
    ]
}

/// Documentation indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_doc_patterns")]
    pub patterns: Vec<String>,
}

impl Default for DocumentationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_doc_patterns(),
        }
    }
}

fn default_doc_patterns() -> Vec<String> {
    vec!["*.md".to_string(), "*.txt".to_string(), "*.rst".to_string()]
}

/// Strategy for ranking results across multiple detected languages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Weighted,
    NonDominated,
}

/// Auto-detected project settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveSettings {
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default)]
    pub detected_languages: Vec<String>,
    #[serde(default)]
    pub search_strategy: SearchStrategy,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            auto_detect: true,
            detected_languages: Vec::new(),
            search_strategy: SearchStrategy::Weighted,
        }
    }
}

/// Memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySettings {
    /// Ceiling on pending decisions; the oldest is FIFO-evicted beyond it.
    #[serde(default = "default_max_pending_decisions")]
    pub max_pending_decisions: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_pending_decisions: default_max_pending_decisions(),
        }
    }
}

fn default_max_pending_decisions() -> usize {
    100
}

impl Config {
    /// Per-project data directory for `root`.
    pub fn project_dir(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR)
    }

    /// Path of the config file for `root`.
    pub fn config_path(root: &Path) -> PathBuf {
        Self::project_dir(root).join("config.json")
    }

    /// Load configuration from a file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config> {
        Ok(jsonio::read_json(path)?.unwrap_or_default())
    }

    /// Load configuration for a project root.
    ///
    /// Search order (first found wins): the project's
    /// `.codescout/config.json`, then the user-global
    /// `~/.config/codescout/config.json`, then defaults.
    pub fn load_for(root: &Path) -> Result<Config> {
        let project_config = Self::config_path(root);
        if project_config.exists() {
            return Self::load(&project_config);
        }
        if let Some(global) = Self::global_config_path() {
            if global.exists() {
                return Self::load(&global);
            }
        }
        Ok(Config::default())
    }

    /// Path of the user-global config file.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("codescout").join("config.json"))
    }

    /// Save configuration as pretty JSON with atomic replace.
    pub fn save(&self, path: &Path) -> Result<()> {
        jsonio::write_json_atomic(path, self)
    }

    /// Validate value ranges. Errors here exit the CLI with code 2.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.search.vector_weight) {
            return Err(EngineError::Config {
                field: "search.vector_weight".to_string(),
                cause: format!("must be in [0, 1], got {}", self.search.vector_weight),
            });
        }
        if !(0.0..=1.0).contains(&self.chunking.merge_threshold) {
            return Err(EngineError::Config {
                field: "chunking.merge_threshold".to_string(),
                cause: format!("must be in [0, 1], got {}", self.chunking.merge_threshold),
            });
        }
        if self.chunking.max_chunk_size == 0 {
            return Err(EngineError::Config {
                field: "chunking.max_chunk_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.indexing.max_file_size_mb <= 0 {
            return Err(EngineError::Config {
                field: "indexing.max_file_size_mb".to_string(),
                cause: format!("must be positive, got {}", self.indexing.max_file_size_mb),
            });
        }
        if self.indexing.chunk_batch_size == 0 {
            return Err(EngineError::Config {
                field: "indexing.chunk_batch_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.embedding.enabled && self.embedding.dimensions <= 0 {
            return Err(EngineError::Config {
                field: "embedding.dimensions".to_string(),
                cause: format!("must be positive, got {}", self.embedding.dimensions),
            });
        }
        if self.search.max_hops < 0 {
            return Err(EngineError::Config {
                field: "search.max_hops".to_string(),
                cause: format!("must be >= 0, got {}", self.search.max_hops),
            });
        }
        if self.memory.max_pending_decisions == 0 {
            return Err(EngineError::Config {
                field: "memory.max_pending_decisions".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.embedding.enabled);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.chunking.max_chunk_size, 1200);
        assert_eq!(config.chunking.min_chunk_size, 50);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.search.vector_weight, 0.7);
        assert_eq!(config.search.max_hops, 2);
        assert_eq!(config.search.tier_boost.get("dependency"), Some(&0.7));
        assert_eq!(config.memory.max_pending_decisions, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"chunking": {"max_chunk_size": 300}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunking.max_chunk_size, 300);
        assert_eq!(config.chunking.min_chunk_size, 50);
        assert!(config.embedding.enabled);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.search.vector_weight = 0.4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        let mut config = Config::default();
        config.search.vector_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_for_prefers_project_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.search.default_limit = 42;
        config.save(&Config::config_path(dir.path())).unwrap();

        let loaded = Config::load_for(dir.path()).unwrap();
        assert_eq!(loaded.search.default_limit, 42);
    }

    #[test]
    fn test_project_paths() {
        let root = Path::new("/repo");
        assert_eq!(
            Config::config_path(root),
            PathBuf::from("/repo/.codescout/config.json")
        );
    }
}
