//! Atomic JSON file persistence.
//!
//! Every JSON artifact the engine writes (config, hash cache, chunk index,
//! memory export) is UTF-8, 2-space indented, and replaced atomically:
//! written to a sibling temp file first, then renamed over the target.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::error::Result;

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }

    let json =
        serde_json::to_string_pretty(value).map_err(|e| EngineError::Internal {
            cause: format!("json serialization failed: {e}"),
        })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).map_err(|e| EngineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// Read a JSON file, returning `None` when it does not exist.
///
/// A file that exists but fails to parse yields an error; callers that treat
/// corruption as empty state use [`read_json_or_default`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    let value = serde_json::from_str(&content).map_err(|e| EngineError::ConfigParse {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    Ok(Some(value))
}

/// Read a JSON file, treating a missing or corrupt file as the default.
///
/// Corruption is logged and never fatal.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt JSON file, treating as empty");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1);
        write_json_atomic(&path, &map).unwrap();

        let loaded: Option<BTreeMap<String, i32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(map));
        // No stray temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<i32>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded: Vec<i32> = read_json_or_default(&path);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_output_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pretty.json");
        let mut map = BTreeMap::new();
        map.insert("key".to_string(), "value".to_string());
        write_json_atomic(&path, &map).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"key\""));
    }
}
