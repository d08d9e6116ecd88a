//! Mirror repository history into the memory store.
//!
//! Tags become changelog entries and merge commits become timeline events,
//! both deduplicated by their natural keys so repeated syncs are idempotent.
//! The git side is a trait; the default implementation shells out to `git`.

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::IndexBackend;

/// A tag as seen by the metadata source.
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub tag: String,
    /// Version parsed from the tag name, when it looks like one.
    pub version: Option<String>,
    pub summary: String,
    pub commit_hash: Option<String>,
    pub commit_time: Option<i64>,
}

/// A merge commit as seen by the metadata source.
#[derive(Debug, Clone)]
pub struct MergeInfo {
    pub from_ref: String,
    pub to_ref: String,
    pub summary: String,
    pub files_changed: Vec<String>,
    pub importance: String,
    pub commit_hash: Option<String>,
    pub commit_time: Option<i64>,
}

/// Pluggable source of repository metadata.
pub trait GitMetadataSource: Send + Sync {
    fn tags(&self) -> Result<Vec<TagInfo>>;
    fn merges(&self, limit: usize) -> Result<Vec<MergeInfo>>;
}

/// Metadata source shelling out to the `git` CLI.
pub struct GitCli {
    repo_path: PathBuf,
}

impl GitCli {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn is_git_repo(path: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            None
        }
    }
}

impl GitMetadataSource for GitCli {
    fn tags(&self) -> Result<Vec<TagInfo>> {
        // tag name, target hash, committer date, subject
        let Some(raw) = self.git(&[
            "for-each-ref",
            "--sort=-creatordate",
            "--format=%(refname:short)\x1f%(objectname)\x1f%(creatordate:unix)\x1f%(subject)",
            "refs/tags",
        ]) else {
            return Ok(Vec::new());
        };

        let tags = raw
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\x1f');
                let tag = parts.next()?.to_string();
                let hash = parts.next().map(str::to_string);
                let time = parts.next().and_then(|t| t.parse().ok());
                let summary = parts.next().unwrap_or("").to_string();
                let version = tag.strip_prefix('v').map(str::to_string).or_else(|| {
                    tag.chars()
                        .next()
                        .filter(char::is_ascii_digit)
                        .map(|_| tag.clone())
                });
                Some(TagInfo {
                    tag,
                    version,
                    summary,
                    commit_hash: hash,
                    commit_time: time,
                })
            })
            .collect();
        Ok(tags)
    }

    fn merges(&self, limit: usize) -> Result<Vec<MergeInfo>> {
        let limit_arg = format!("-{limit}");
        let Some(raw) = self.git(&[
            "log",
            "--merges",
            &limit_arg,
            "--format=%H\x1f%ct\x1f%s",
        ]) else {
            return Ok(Vec::new());
        };

        let merges = raw
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\x1f');
                let hash = parts.next()?.to_string();
                let time = parts.next().and_then(|t| t.parse().ok());
                let subject = parts.next().unwrap_or("").to_string();
                let (from_ref, to_ref) = parse_merge_subject(&subject);
                Some(MergeInfo {
                    from_ref,
                    to_ref,
                    summary: subject,
                    files_changed: Vec::new(),
                    importance: "medium".to_string(),
                    commit_hash: Some(hash),
                    commit_time: time,
                })
            })
            .collect();
        Ok(merges)
    }
}

/// Pull branch names out of a conventional merge subject.
fn parse_merge_subject(subject: &str) -> (String, String) {
    // "Merge branch 'feature/x' into main" / "Merge pull request #12 from org/branch"
    let from = subject
        .split_once("branch '")
        .and_then(|(_, rest)| rest.split_once('\''))
        .map(|(branch, _)| branch.to_string())
        .or_else(|| {
            subject
                .split_once(" from ")
                .map(|(_, rest)| rest.split_whitespace().next().unwrap_or("").to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let to = subject
        .split_once(" into ")
        .map(|(_, rest)| rest.trim().trim_matches('\'').to_string())
        .unwrap_or_else(|| "main".to_string());

    (from, to)
}

/// Statistics from one sync run.
#[derive(Debug, Default, Clone)]
pub struct GitSyncStats {
    pub changelogs_added: usize,
    pub changelogs_skipped: usize,
    pub timeline_added: usize,
    pub timeline_skipped: usize,
    pub errors: Vec<String>,
}

/// Sync options.
#[derive(Debug, Clone)]
pub struct GitSyncOptions {
    pub limit: usize,
    pub tags_only: bool,
    pub merges_only: bool,
    /// Minimum importance for timeline events: `low`, `medium` or `high`.
    pub min_importance: String,
}

impl Default for GitSyncOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            tags_only: false,
            merges_only: false,
            min_importance: "low".to_string(),
        }
    }
}

/// Mirrors repository history into the memory tables.
pub struct GitSync {
    backend: Arc<IndexBackend>,
    source: Arc<dyn GitMetadataSource>,
}

impl GitSync {
    pub fn new(backend: Arc<IndexBackend>, source: Arc<dyn GitMetadataSource>) -> Self {
        Self { backend, source }
    }

    pub async fn sync(&self, options: &GitSyncOptions) -> Result<GitSyncStats> {
        let mut stats = GitSyncStats::default();

        if !options.merges_only {
            match self.source.tags() {
                Ok(tags) => {
                    for tag in tags {
                        if self.backend.changelog_exists(&tag.tag).await? {
                            stats.changelogs_skipped += 1;
                            continue;
                        }
                        self.backend
                            .add_changelog(
                                tag.tag,
                                tag.version,
                                tag.summary,
                                tag.commit_hash,
                                tag.commit_time,
                            )
                            .await?;
                        stats.changelogs_added += 1;
                        if stats.changelogs_added >= options.limit {
                            break;
                        }
                    }
                }
                Err(e) => stats.errors.push(format!("tag scan failed: {e}")),
            }
        }

        if !options.tags_only {
            match self.source.merges(options.limit) {
                Ok(merges) => {
                    for merge in merges {
                        if !meets_importance(&merge.importance, &options.min_importance) {
                            stats.timeline_skipped += 1;
                            continue;
                        }
                        if self
                            .backend
                            .timeline_event_exists("merge", &merge.from_ref, &merge.to_ref)
                            .await?
                        {
                            stats.timeline_skipped += 1;
                            continue;
                        }
                        self.backend
                            .add_timeline_event(
                                "merge".to_string(),
                                merge.from_ref,
                                merge.to_ref,
                                merge.summary,
                                merge.files_changed,
                                merge.importance,
                                merge.commit_hash,
                                merge.commit_time,
                            )
                            .await?;
                        stats.timeline_added += 1;
                        if stats.timeline_added >= options.limit {
                            break;
                        }
                    }
                }
                Err(e) => stats.errors.push(format!("merge scan failed: {e}")),
            }
        }

        Ok(stats)
    }
}

fn meets_importance(event: &str, minimum: &str) -> bool {
    fn level(s: &str) -> u8 {
        match s {
            "high" => 2,
            "medium" => 1,
            _ => 0,
        }
    }
    level(event) >= level(minimum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct FakeSource {
        tags: Vec<TagInfo>,
        merges: Vec<MergeInfo>,
    }

    impl GitMetadataSource for FakeSource {
        fn tags(&self) -> Result<Vec<TagInfo>> {
            Ok(self.tags.clone())
        }
        fn merges(&self, limit: usize) -> Result<Vec<MergeInfo>> {
            Ok(self.merges.iter().take(limit).cloned().collect())
        }
    }

    fn tag(name: &str) -> TagInfo {
        TagInfo {
            tag: name.to_string(),
            version: name.strip_prefix('v').map(str::to_string),
            summary: format!("Release {name}"),
            commit_hash: Some("deadbeef".to_string()),
            commit_time: Some(1_700_000_000),
        }
    }

    fn merge(from: &str, importance: &str) -> MergeInfo {
        MergeInfo {
            from_ref: from.to_string(),
            to_ref: "main".to_string(),
            summary: format!("Merge branch '{from}' into main"),
            files_changed: Vec::new(),
            importance: importance.to_string(),
            commit_hash: None,
            commit_time: None,
        }
    }

    #[test]
    fn test_parse_merge_subject() {
        let (from, to) = parse_merge_subject("Merge branch 'feature/login' into develop");
        assert_eq!(from, "feature/login");
        assert_eq!(to, "develop");

        let (from, to) = parse_merge_subject("Merge pull request #7 from org/fix-crash");
        assert_eq!(from, "org/fix-crash");
        assert_eq!(to, "main");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            crate::storage::IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap(),
        );
        let source = Arc::new(FakeSource {
            tags: vec![tag("v1.0.0"), tag("v1.1.0")],
            merges: vec![merge("feature/a", "medium")],
        });
        let sync = GitSync::new(backend.clone(), source);

        let first = sync.sync(&GitSyncOptions::default()).await.unwrap();
        assert_eq!(first.changelogs_added, 2);
        assert_eq!(first.timeline_added, 1);

        let second = sync.sync(&GitSyncOptions::default()).await.unwrap();
        assert_eq!(second.changelogs_added, 0);
        assert_eq!(second.changelogs_skipped, 2);
        assert_eq!(second.timeline_added, 0);
        assert_eq!(second.timeline_skipped, 1);
    }

    #[tokio::test]
    async fn test_importance_threshold_filters_merges() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            crate::storage::IndexBackend::create(&dir.path().join("index.db"), None, 0).unwrap(),
        );
        let source = Arc::new(FakeSource {
            tags: Vec::new(),
            merges: vec![merge("feature/minor", "low"), merge("feature/major", "high")],
        });
        let sync = GitSync::new(backend.clone(), source);

        let stats = sync
            .sync(&GitSyncOptions {
                min_importance: "high".to_string(),
                ..GitSyncOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(stats.timeline_added, 1);
        assert_eq!(stats.timeline_skipped, 1);

        let events = backend.get_timeline_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_ref, "feature/major");
    }
}
