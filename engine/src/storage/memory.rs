//! Auxiliary memory store: decisions, timeline events, changelogs.
//!
//! Shares the backend's database. Decisions move pending → approved or
//! rejected; a SQL trigger FIFO-evicts the oldest pending entry once more
//! than 100 are waiting. Approving copies the decision into
//! `approved_memory`, the long-lived record searched for context.

use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::storage::backend::IndexBackend;
use crate::storage::sqlite::OptionalExt;

/// Lifecycle state of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> DecisionStatus {
        match s {
            "approved" => DecisionStatus::Approved,
            "rejected" => DecisionStatus::Rejected,
            _ => DecisionStatus::Pending,
        }
    }
}

/// A recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub session_id: Option<String>,
    pub title: String,
    pub description: String,
    pub reasoning: Option<String>,
    pub status: DecisionStatus,
    pub category: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_time: Option<i64>,
    pub created_at: i64,
    pub approved_at: Option<i64>,
}

/// A repository history event (merge, release, branch point).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: i64,
    pub event_type: String,
    pub from_ref: String,
    pub to_ref: String,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub importance: String,
    pub commit_hash: Option<String>,
    pub commit_time: Option<i64>,
    pub created_at: i64,
}

/// A released version mirrored from a tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: i64,
    pub tag: String,
    pub version: Option<String>,
    pub summary: String,
    pub commit_hash: Option<String>,
    pub commit_time: Option<i64>,
    pub created_at: i64,
}

/// A hit from approved-memory search.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub score: f32,
}

impl IndexBackend {
    // ========== Decisions ==========

    pub async fn add_decision(
        &self,
        session_id: Option<String>,
        title: String,
        description: String,
        reasoning: Option<String>,
        commit_hash: Option<String>,
        commit_time: Option<i64>,
    ) -> Result<i64> {
        self.store
            .query(move |conn| {
                conn.execute(
                    "INSERT INTO decisions
                     (session_id, title, description, reasoning, commit_hash, commit_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![session_id, title, description, reasoning, commit_hash, commit_time],
                )
                .map_err(|e| EngineError::sqlite_op("insert decision", e))?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// Approve a pending decision and copy it into approved memory.
    pub async fn approve_decision(&self, id: i64, category: String) -> Result<i64> {
        self.store
            .transaction(move |conn| {
                let updated = conn
                    .execute(
                        "UPDATE decisions
                         SET status = 'approved', category = ?2,
                             approved_at = strftime('%s', 'now')
                         WHERE id = ?1 AND status = 'pending'",
                        params![id, category],
                    )
                    .map_err(|e| EngineError::sqlite_op("approve decision", e))?;
                if updated == 0 {
                    return Err(EngineError::Internal {
                        cause: format!("decision {id} is not pending"),
                    });
                }

                conn.execute(
                    "INSERT INTO approved_memory (decision_id, category, title, content)
                     SELECT id, category, title, description || COALESCE(char(10) || reasoning, '')
                     FROM decisions WHERE id = ?1",
                    params![id],
                )
                .map_err(|e| EngineError::sqlite_op("record approved memory", e))?;
                Ok(id)
            })
            .await
    }

    pub async fn reject_decision(&self, id: i64) -> Result<()> {
        self.store
            .query(move |conn| {
                conn.execute(
                    "UPDATE decisions SET status = 'rejected' WHERE id = ?1",
                    params![id],
                )
                .map_err(|e| EngineError::sqlite_op("reject decision", e))?;
                Ok(())
            })
            .await
    }

    pub async fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        self.store
            .query(move |conn| {
                conn.query_row(
                    "SELECT id, session_id, title, description, reasoning, status, category,
                            commit_hash, commit_time, created_at, approved_at
                     FROM decisions WHERE id = ?1",
                    params![id],
                    decision_from_row,
                )
                .optional()
            })
            .await
    }

    pub async fn list_pending_decisions(&self, limit: Option<usize>) -> Result<Vec<Decision>> {
        self.store
            .query(move |conn| {
                let sql = format!(
                    "SELECT id, session_id, title, description, reasoning, status, category,
                            commit_hash, commit_time, created_at, approved_at
                     FROM decisions WHERE status = 'pending'
                     ORDER BY created_at DESC, id DESC LIMIT {}",
                    limit.map_or(-1, |l| l as i64)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], decision_from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::sqlite_op("list pending decisions", e))
            })
            .await
    }

    pub async fn list_approved_decisions(&self) -> Result<Vec<Decision>> {
        self.store
            .query(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, title, description, reasoning, status, category,
                            commit_hash, commit_time, created_at, approved_at
                     FROM decisions WHERE status = 'approved'
                     ORDER BY approved_at DESC, id DESC",
                )?;
                let rows = stmt.query_map([], decision_from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::sqlite_op("list approved decisions", e))
            })
            .await
    }

    pub async fn decision_exists_by_title(&self, title: &str) -> Result<bool> {
        let title = title.to_string();
        self.store
            .query(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM decisions WHERE title = ?1",
                    params![title],
                    |r| r.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    // ========== Timeline ==========

    #[allow(clippy::too_many_arguments)]
    pub async fn add_timeline_event(
        &self,
        event_type: String,
        from_ref: String,
        to_ref: String,
        summary: String,
        files_changed: Vec<String>,
        importance: String,
        commit_hash: Option<String>,
        commit_time: Option<i64>,
    ) -> Result<i64> {
        self.store
            .query(move |conn| {
                let files_json = serde_json::to_string(&files_changed).unwrap_or_default();
                conn.execute(
                    "INSERT INTO timeline
                     (event_type, from_ref, to_ref, summary, files_changed, importance,
                      commit_hash, commit_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        event_type,
                        from_ref,
                        to_ref,
                        summary,
                        files_json,
                        importance,
                        commit_hash,
                        commit_time
                    ],
                )
                .map_err(|e| EngineError::sqlite_op("insert timeline event", e))?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn get_timeline_events(&self, limit: Option<usize>) -> Result<Vec<TimelineEvent>> {
        self.store
            .query(move |conn| {
                let sql = format!(
                    "SELECT id, event_type, from_ref, to_ref, summary, files_changed,
                            importance, commit_hash, commit_time, created_at
                     FROM timeline ORDER BY created_at DESC, id DESC LIMIT {}",
                    limit.map_or(-1, |l| l as i64)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], timeline_from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::sqlite_op("list timeline events", e))
            })
            .await
    }

    pub async fn timeline_event_exists(
        &self,
        event_type: &str,
        from_ref: &str,
        to_ref: &str,
    ) -> Result<bool> {
        let (event_type, from_ref, to_ref) = (
            event_type.to_string(),
            from_ref.to_string(),
            to_ref.to_string(),
        );
        self.store
            .query(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM timeline
                     WHERE event_type = ?1 AND from_ref = ?2 AND to_ref = ?3",
                    params![event_type, from_ref, to_ref],
                    |r| r.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    // ========== Changelogs ==========

    pub async fn add_changelog(
        &self,
        tag: String,
        version: Option<String>,
        summary: String,
        commit_hash: Option<String>,
        commit_time: Option<i64>,
    ) -> Result<i64> {
        self.store
            .query(move |conn| {
                conn.execute(
                    "INSERT INTO changelogs (tag, version, summary, commit_hash, commit_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![tag, version, summary, commit_hash, commit_time],
                )
                .map_err(|e| EngineError::sqlite_op("insert changelog", e))?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn get_changelogs(&self, limit: Option<usize>) -> Result<Vec<ChangelogEntry>> {
        self.store
            .query(move |conn| {
                let sql = format!(
                    "SELECT id, tag, version, summary, commit_hash, commit_time, created_at
                     FROM changelogs ORDER BY created_at DESC, id DESC LIMIT {}",
                    limit.map_or(-1, |l| l as i64)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], changelog_from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::sqlite_op("list changelogs", e))
            })
            .await
    }

    /// BM25 search over approved memory.
    pub async fn search_memory(&self, query: &str, k: usize) -> Result<Vec<MemoryHit>> {
        let Some(fts_query) = crate::storage::backend::sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT m.title, m.content, m.category, bm25(memory_fts) AS rank
                     FROM memory_fts
                     JOIN approved_memory m ON m.id = memory_fts.rowid
                     WHERE memory_fts MATCH ?1
                     ORDER BY rank
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![fts_query, k as i64], |row| {
                        let rank: f64 = row.get(3)?;
                        Ok(MemoryHit {
                            title: row.get(0)?,
                            content: row.get(1)?,
                            category: row.get(2)?,
                            score: rank.abs() as f32 / 100.0,
                        })
                    })
                    .map_err(|e| EngineError::sqlite_op("memory search", e))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::sqlite_op("read memory hit", e))
            })
            .await
    }

    pub async fn changelog_exists(&self, tag: &str) -> Result<bool> {
        let tag = tag.to_string();
        self.store
            .query(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM changelogs WHERE tag = ?1",
                    params![tag],
                    |r| r.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }
}

fn decision_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Decision, rusqlite::Error> {
    let status: String = row.get(5)?;
    Ok(Decision {
        id: row.get(0)?,
        session_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        reasoning: row.get(4)?,
        status: DecisionStatus::parse(&status),
        category: row.get(6)?,
        commit_hash: row.get(7)?,
        commit_time: row.get(8)?,
        created_at: row.get(9)?,
        approved_at: row.get(10)?,
    })
}

fn timeline_from_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<TimelineEvent, rusqlite::Error> {
    let files_json: Option<String> = row.get(5)?;
    Ok(TimelineEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        from_ref: row.get(2)?,
        to_ref: row.get(3)?,
        summary: row.get(4)?,
        files_changed: files_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        importance: row.get(6)?,
        commit_hash: row.get(7)?,
        commit_time: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn changelog_from_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ChangelogEntry, rusqlite::Error> {
    Ok(ChangelogEntry {
        id: row.get(0)?,
        tag: row.get(1)?,
        version: row.get(2)?,
        summary: row.get(3)?,
        commit_hash: row.get(4)?,
        commit_time: row.get(5)?,
        created_at: row.get(6)?,
    })
}
