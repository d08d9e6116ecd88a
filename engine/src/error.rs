//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error kinds.
///
/// Component APIs return this discriminated type; the indexing coordinator
/// aggregates per-file failures into its stats instead of propagating them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration value.
    #[error("invalid config '{field}': {cause}")]
    Config { field: String, cause: String },

    /// Configuration file could not be parsed.
    #[error("failed to parse config {}: {cause}", .path.display())]
    ConfigParse { path: PathBuf, cause: String },

    /// I/O failure with path context.
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source file could not be parsed.
    #[error("parse failed for {}: {cause}", .path.display())]
    Parse { path: PathBuf, cause: String },

    /// Embedding provider failure (transport, quota, bad response).
    #[error("embedding failed: {cause}")]
    Embedding { cause: String },

    /// Embedding vector length does not match the store dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: i32, actual: i32 },

    /// SQLite failure tied to a database file.
    #[error("sqlite error at {}: {cause}", .path.display())]
    Sqlite { path: PathBuf, cause: String },

    /// SQLite failure tied to a specific operation.
    #[error("sqlite operation '{operation}' failed: {cause}")]
    SqliteFailed { operation: String, cause: String },

    /// The index file exists but is unusable (schema mismatch, corruption).
    #[error("index corrupted at {}: {cause}", .path.display())]
    IndexCorrupted { path: PathBuf, cause: String },

    /// A write was attempted on a read-only backend.
    #[error("'{operation}' requires a writable index")]
    NotWritable { operation: String },

    /// Operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// Invariant violation. Never swallowed.
    #[error("internal error: {cause}")]
    Internal { cause: String },
}

impl EngineError {
    /// Process exit code for the CLI: 2 for configuration problems,
    /// 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config { .. } | EngineError::ConfigParse { .. } => 2,
            _ => 1,
        }
    }

    /// Whether a retry can plausibly succeed.
    ///
    /// Transient transport and I/O failures are retryable; parse errors are
    /// deterministic and memory exhaustion must not be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Embedding { .. } | EngineError::Io { .. } => true,
            EngineError::Internal { cause } => !cause.to_lowercase().contains("memory"),
            _ => false,
        }
    }

    /// Shorthand for I/O errors with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for operation-scoped SQLite errors.
    pub fn sqlite_op(operation: impl Into<String>, cause: impl ToString) -> Self {
        EngineError::SqliteFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::SqliteFailed {
            operation: "sqlite".to_string(),
            cause: e.to_string(),
        }
    }
}
