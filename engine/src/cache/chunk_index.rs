//! Chunk staleness ledger.
//!
//! Tracks, for every chunk id the store has ever produced, whether it is
//! still valid or was superseded by a re-index of its file. The valid set
//! filters search results; the stale ratio drives compaction.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::jsonio;

/// Validity state of one chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Valid,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkEntry {
    status: ChunkStatus,
    file_id: String,
    created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    hash: String,
    mtime: i64,
    size: u64,
    chunk_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    chunks: HashMap<String, ChunkEntry>,
    files: HashMap<String, FileEntry>,
}

/// Staleness accounting over the whole ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct StalenessSummary {
    pub total: usize,
    pub valid: usize,
    pub stale: usize,
    /// `stale / total`; 0.0 for an empty ledger.
    pub ratio: f64,
    pub status: &'static str,
    pub recommendation: &'static str,
}

/// Chunk-id → status ledger with JSON persistence.
#[derive(Debug)]
pub struct ChunkIndex {
    path: PathBuf,
    ledger: Ledger,
}

impl ChunkIndex {
    /// Load from `path`; missing or corrupt files yield an empty ledger.
    pub fn load(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ledger: jsonio::read_json_or_default(path),
        }
    }

    /// Persist with atomic replace.
    pub fn save(&self) -> Result<()> {
        jsonio::write_json_atomic(&self.path, &self.ledger)
    }

    /// Ids of all currently-valid chunks.
    pub fn valid_chunks(&self) -> HashSet<String> {
        self.ledger
            .chunks
            .iter()
            .filter(|(_, e)| e.status == ChunkStatus::Valid)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record a re-index of `file`: every chunk id previously attributed to
    /// it goes stale, the new ids are inserted as valid.
    pub fn update_file(
        &mut self,
        file: &Path,
        hash: String,
        mtime: i64,
        size: u64,
        new_chunk_ids: &[String],
    ) {
        let file_id = file.to_string_lossy().to_string();

        if let Some(previous) = self.ledger.files.get(&file_id) {
            for id in &previous.chunk_ids {
                // A chunk id that reappears in the new set stays valid; the
                // store reuses ids for unchanged spans.
                if new_chunk_ids.contains(id) {
                    continue;
                }
                if let Some(entry) = self.ledger.chunks.get_mut(id) {
                    entry.status = ChunkStatus::Stale;
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        for id in new_chunk_ids {
            self.ledger.chunks.insert(
                id.clone(),
                ChunkEntry {
                    status: ChunkStatus::Valid,
                    file_id: file_id.clone(),
                    created_at: now,
                },
            );
        }

        self.ledger.files.insert(
            file_id,
            FileEntry {
                hash,
                mtime,
                size,
                chunk_ids: new_chunk_ids.to_vec(),
            },
        );
    }

    /// Stale-mark every chunk belonging to a file absent from `seen_paths`.
    pub fn cleanup_deleted_files(&mut self, seen_paths: &HashSet<String>) -> usize {
        let mut marked = 0;
        let deleted: Vec<String> = self
            .ledger
            .files
            .keys()
            .filter(|f| !seen_paths.contains(*f))
            .cloned()
            .collect();

        for file_id in deleted {
            if let Some(entry) = self.ledger.files.remove(&file_id) {
                for id in &entry.chunk_ids {
                    if let Some(chunk) = self.ledger.chunks.get_mut(id) {
                        if chunk.status == ChunkStatus::Valid {
                            chunk.status = ChunkStatus::Stale;
                            marked += 1;
                        }
                    }
                }
            }
        }
        marked
    }

    /// Drop all stale entries (after a compaction pass re-wrote the store).
    pub fn prune_stale(&mut self) -> usize {
        let before = self.ledger.chunks.len();
        self.ledger
            .chunks
            .retain(|_, e| e.status == ChunkStatus::Valid);
        before - self.ledger.chunks.len()
    }

    /// Remove everything (used by `index --clean`).
    pub fn clear(&mut self) {
        self.ledger.chunks.clear();
        self.ledger.files.clear();
    }

    pub fn staleness_summary(&self) -> StalenessSummary {
        let total = self.ledger.chunks.len();
        let stale = self
            .ledger
            .chunks
            .values()
            .filter(|e| e.status == ChunkStatus::Stale)
            .count();
        let valid = total - stale;
        let ratio = if total == 0 {
            0.0
        } else {
            stale as f64 / total as f64
        };

        let (status, recommendation) = if ratio >= 0.2 {
            ("degraded", "run `codescout compact` to reclaim space")
        } else {
            ("healthy", "no action needed")
        };

        StalenessSummary {
            total,
            valid,
            stale,
            ratio,
            status,
            recommendation,
        }
    }

    pub fn file_count(&self) -> usize {
        self.ledger.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_update_file_marks_previous_ids_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));
        let file = Path::new("/repo/a.py");

        index.update_file(file, "h1".to_string(), 1, 10, &ids(&["1", "2"]));
        index.update_file(file, "h2".to_string(), 2, 12, &ids(&["3", "4"]));

        let valid = index.valid_chunks();
        assert_eq!(valid, HashSet::from(["3".to_string(), "4".to_string()]));

        let summary = index.staleness_summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.stale, 2);
        assert!((summary.ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reused_ids_stay_valid() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));
        let file = Path::new("/repo/a.py");

        index.update_file(file, "h1".to_string(), 1, 10, &ids(&["1", "2"]));
        index.update_file(file, "h2".to_string(), 2, 12, &ids(&["1", "3"]));

        let valid = index.valid_chunks();
        assert!(valid.contains("1"));
        assert!(valid.contains("3"));
        assert!(!valid.contains("2"));
    }

    #[test]
    fn test_valid_plus_stale_equals_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));

        index.update_file(Path::new("a.py"), "h".into(), 0, 0, &ids(&["1", "2"]));
        index.update_file(Path::new("b.py"), "h".into(), 0, 0, &ids(&["3"]));
        index.update_file(Path::new("a.py"), "h2".into(), 0, 0, &ids(&["4"]));

        let s = index.staleness_summary();
        assert_eq!(s.valid + s.stale, s.total);
    }

    #[test]
    fn test_cleanup_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));

        index.update_file(Path::new("a.py"), "h".into(), 0, 0, &ids(&["1"]));
        index.update_file(Path::new("b.py"), "h".into(), 0, 0, &ids(&["2"]));

        let seen = HashSet::from(["a.py".to_string()]);
        let marked = index.cleanup_deleted_files(&seen);

        assert_eq!(marked, 1);
        assert_eq!(index.valid_chunks(), HashSet::from(["1".to_string()]));
    }

    #[test]
    fn test_staleness_recommendation_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));

        index.update_file(Path::new("a.py"), "h".into(), 0, 0, &ids(&["1", "2", "3", "4"]));
        assert_eq!(index.staleness_summary().status, "healthy");

        index.update_file(Path::new("a.py"), "h2".into(), 0, 0, &ids(&["5", "6", "7", "8"]));
        assert_eq!(index.staleness_summary().status, "degraded");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk_index.json");

        let mut index = ChunkIndex::load(&path);
        index.update_file(Path::new("a.py"), "h".into(), 0, 0, &ids(&["1"]));
        index.save().unwrap();

        let reloaded = ChunkIndex::load(&path);
        assert_eq!(reloaded.valid_chunks(), HashSet::from(["1".to_string()]));
        assert_eq!(reloaded.file_count(), 1);
    }

    #[test]
    fn test_corrupt_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk_index.json");
        std::fs::write(&path, "not json at all").unwrap();

        let index = ChunkIndex::load(&path);
        assert_eq!(index.staleness_summary().total, 0);
    }

    #[test]
    fn test_prune_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ChunkIndex::load(&dir.path().join("chunk_index.json"));

        index.update_file(Path::new("a.py"), "h".into(), 0, 0, &ids(&["1", "2"]));
        index.update_file(Path::new("a.py"), "h2".into(), 0, 0, &ids(&["3"]));

        let pruned = index.prune_stale();
        assert_eq!(pruned, 2);
        assert_eq!(index.staleness_summary().total, 1);
    }
}
