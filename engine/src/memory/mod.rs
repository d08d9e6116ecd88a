//! Repository-history memory: git mirroring and the shared export format.

pub mod export;
pub mod git_sync;

pub use export::MemoryExport;
pub use git_sync::GitCli;
pub use git_sync::GitMetadataSource;
pub use git_sync::GitSync;
pub use git_sync::GitSyncStats;
