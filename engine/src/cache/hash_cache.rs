//! Per-file content-hash cache for change detection.
//!
//! Persisted as one JSON document, replaced atomically on save. A missing
//! or corrupt file loads as an empty cache.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::jsonio;
use crate::types::content_hash;

/// What we knew about a file the last time it was indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileHashRecord {
    pub hash: String,
    pub mtime: i64,
    pub size: u64,
    /// Chunk ids produced at the last indexing of this file.
    pub chunk_ids: Vec<String>,
}

/// File-path → hash record map with JSON persistence.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: HashMap<String, FileHashRecord>,
}

impl HashCache {
    /// Load the cache from `path`; missing or corrupt files yield an empty
    /// cache.
    pub fn load(path: &Path) -> Self {
        let entries = jsonio::read_json_or_default(path);
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Persist the cache with atomic replace.
    pub fn save(&self) -> Result<()> {
        jsonio::write_json_atomic(&self.path, &self.entries)
    }

    /// Hash a file's bytes.
    pub fn compute_hash(file: &Path) -> Result<String> {
        let bytes = fs::read(file).map_err(|e| EngineError::io(file, e))?;
        Ok(content_hash(&bytes))
    }

    /// True when the stored hash differs from the file's current hash, or
    /// the file was never cached. Unreadable files count as changed.
    pub fn has_changed(&self, file: &Path) -> bool {
        let Some(record) = self.entries.get(&key_for(file)) else {
            return true;
        };
        match Self::compute_hash(file) {
            Ok(hash) => hash != record.hash,
            Err(_) => true,
        }
    }

    /// Chunk ids recorded for a file at its last indexing.
    pub fn chunk_ids(&self, file: &Path) -> &[String] {
        self.entries
            .get(&key_for(file))
            .map(|r| r.chunk_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Record the current state of a file and the chunk ids it produced.
    pub fn update(&mut self, file: &Path, chunk_ids: Vec<String>) -> Result<FileHashRecord> {
        let hash = Self::compute_hash(file)?;
        let meta = fs::metadata(file).map_err(|e| EngineError::io(file, e))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let record = FileHashRecord {
            hash,
            mtime,
            size: meta.len(),
            chunk_ids,
        };
        self.entries.insert(key_for(file), record.clone());
        Ok(record)
    }

    /// Drop entries for files not in `seen`.
    pub fn retain_files(&mut self, seen: &std::collections::HashSet<String>) {
        self.entries.retain(|path, _| seen.contains(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything (used by `index --clean`).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// Keys are the paths exactly as discovery produced them, matching the
// chunk ledger's file ids and the compaction seen-set.
fn key_for(file: &Path) -> String {
    file.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_file_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::load(&dir.path().join("hashes.json"));
        assert!(cache.has_changed(&dir.path().join("new.py")));
    }

    #[test]
    fn test_update_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "def alpha(): return 1").unwrap();

        let mut cache = HashCache::load(&dir.path().join("hashes.json"));
        cache.update(&file, vec!["1".to_string()]).unwrap();

        assert!(!cache.has_changed(&file));
        assert_eq!(cache.chunk_ids(&file), ["1".to_string()]);
    }

    #[test]
    fn test_modification_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "x = 1").unwrap();

        let mut cache = HashCache::load(&dir.path().join("hashes.json"));
        cache.update(&file, vec![]).unwrap();
        fs::write(&file, "x = 2").unwrap();

        assert!(cache.has_changed(&file));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("hashes.json");
        let file = dir.path().join("a.py");
        fs::write(&file, "x = 1").unwrap();

        let mut cache = HashCache::load(&cache_path);
        cache.update(&file, vec!["7".to_string()]).unwrap();
        cache.save().unwrap();

        let reloaded = HashCache::load(&cache_path);
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.has_changed(&file));
    }

    #[test]
    fn test_corrupt_cache_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("hashes.json");
        fs::write(&cache_path, "{broken").unwrap();

        let cache = HashCache::load(&cache_path);
        assert!(cache.is_empty());
    }
}
