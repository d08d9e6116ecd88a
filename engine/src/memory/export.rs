//! Shared memory export (`memory.json`).
//!
//! The export file travels with the repository so decisions and history
//! survive across clones. Import is idempotent by natural key: timeline
//! events by `(from_ref, to_ref, event_type)`, changelogs by `tag`,
//! decisions by `title`. On conflict the newest timestamp wins, but an
//! existing approved decision is never downgraded.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::jsonio;
use crate::storage::ChangelogEntry;
use crate::storage::IndexBackend;
use crate::storage::TimelineEvent;

const EXPORT_VERSION: &str = "1.0";

/// Serialized form of a decision in the export file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedDecision {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_time: Option<i64>,
    #[serde(default)]
    pub approved_at: Option<i64>,
}

/// The `memory.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryExport {
    pub version: String,
    pub exported_at: i64,
    pub project: String,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub changelogs: Vec<ChangelogEntry>,
    #[serde(default)]
    pub decisions: Vec<ExportedDecision>,
}

/// Counters from one import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub added: usize,
    pub skipped: usize,
}

/// Export all memory to `path`.
pub async fn export_memory(
    backend: &Arc<IndexBackend>,
    project: &str,
    path: &Path,
) -> Result<MemoryExport> {
    let timeline = backend.get_timeline_events(None).await?;
    let changelogs = backend.get_changelogs(None).await?;
    let decisions = backend
        .list_approved_decisions()
        .await?
        .into_iter()
        .map(|d| ExportedDecision {
            title: d.title,
            description: d.description,
            reasoning: d.reasoning,
            category: d.category,
            commit_hash: d.commit_hash,
            commit_time: d.commit_time,
            approved_at: d.approved_at,
        })
        .collect();

    let export = MemoryExport {
        version: EXPORT_VERSION.to_string(),
        exported_at: chrono::Utc::now().timestamp(),
        project: project.to_string(),
        timeline,
        changelogs,
        decisions,
    };

    jsonio::write_json_atomic(path, &export)?;
    Ok(export)
}

/// Import memory from `path`, idempotently.
pub async fn import_memory(backend: &Arc<IndexBackend>, path: &Path) -> Result<ImportResult> {
    let export: MemoryExport = jsonio::read_json(path)?.ok_or_else(|| {
        EngineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "import file not found"),
        )
    })?;

    let mut result = ImportResult::default();

    for event in export.timeline {
        if backend
            .timeline_event_exists(&event.event_type, &event.from_ref, &event.to_ref)
            .await?
        {
            result.skipped += 1;
            continue;
        }
        backend
            .add_timeline_event(
                event.event_type,
                event.from_ref,
                event.to_ref,
                event.summary,
                event.files_changed,
                event.importance,
                event.commit_hash,
                event.commit_time,
            )
            .await?;
        result.added += 1;
    }

    for changelog in export.changelogs {
        if backend.changelog_exists(&changelog.tag).await? {
            result.skipped += 1;
            continue;
        }
        backend
            .add_changelog(
                changelog.tag,
                changelog.version,
                changelog.summary,
                changelog.commit_hash,
                changelog.commit_time,
            )
            .await?;
        result.added += 1;
    }

    for decision in export.decisions {
        // A decision already known by title is never replaced; in
        // particular an approved one is never downgraded.
        if backend.decision_exists_by_title(&decision.title).await? {
            result.skipped += 1;
            continue;
        }
        let id = backend
            .add_decision(
                Some("imported".to_string()),
                decision.title,
                decision.description,
                decision.reasoning,
                decision.commit_hash,
                decision.commit_time,
            )
            .await?;
        backend
            .approve_decision(id, decision.category.unwrap_or_else(|| "imported".to_string()))
            .await?;
        result.added += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_backend(dir: &tempfile::TempDir) -> Arc<IndexBackend> {
        let backend =
            Arc::new(IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap());

        backend
            .add_timeline_event(
                "merge".to_string(),
                "feature/a".to_string(),
                "main".to_string(),
                "Merge feature/a".to_string(),
                Vec::new(),
                "medium".to_string(),
                None,
                Some(1_700_000_000),
            )
            .await
            .unwrap();
        backend
            .add_changelog(
                "v1.0.0".to_string(),
                Some("1.0.0".to_string()),
                "First release".to_string(),
                None,
                None,
            )
            .await
            .unwrap();
        let id = backend
            .add_decision(
                None,
                "Adopt hybrid search".to_string(),
                "Fuse lexical and dense rankings".to_string(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        backend
            .approve_decision(id, "search".to_string())
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_backend(&dir).await;
        let export_path = dir.path().join("memory.json");

        let export = export_memory(&source, "demo", &export_path).await.unwrap();
        assert_eq!(export.version, "1.0");
        assert_eq!(export.timeline.len(), 1);
        assert_eq!(export.changelogs.len(), 1);
        assert_eq!(export.decisions.len(), 1);

        let dir2 = tempfile::tempdir().unwrap();
        let target =
            Arc::new(IndexBackend::create(&dir2.path().join("index.db"), None, 0).unwrap());
        let result = import_memory(&target, &export_path).await.unwrap();
        assert_eq!(result.added, 3);
        assert_eq!(result.skipped, 0);

        // Imported decisions arrive approved
        let approved = target.list_approved_decisions().await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].title, "Adopt hybrid search");
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = seeded_backend(&dir).await;
        let export_path = dir.path().join("memory.json");

        export_memory(&backend, "demo", &export_path).await.unwrap();

        // Importing into the same store changes nothing
        let result = import_memory(&backend, &export_path).await.unwrap();
        assert_eq!(result.added, 0);
        assert_eq!(result.skipped, 3);

        let result = import_memory(&backend, &export_path).await.unwrap();
        assert_eq!(result.added, 0);
        assert_eq!(result.skipped, 3);
    }

    #[tokio::test]
    async fn test_import_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap());
        assert!(
            import_memory(&backend, &dir.path().join("absent.json"))
                .await
                .is_err()
        );
    }
}
