//! File discovery with gitignore-aware filtering.
//!
//! Shared by codescout tools so that every component that walks a source
//! tree applies the same rules: configured include/exclude globs, a default
//! exclusion set for VCS and build artifacts, every `.gitignore` encountered
//! down the tree (nested files scoped to their own subdirectory), and a
//! per-file size ceiling.

use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use ignore::WalkBuilder;
use walkdir::WalkDir;

/// Directories and file patterns that are never worth indexing.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    "node_modules/",
    "__pycache__/",
    "target/",
    "build/",
    "dist/",
    "out/",
    "venv/",
    ".venv/",
    ".codescout/",
    "*.pyc",
    "*.pyo",
    "*.so",
    "*.dylib",
    "*.o",
    "*.a",
    "*.class",
    "*.min.js",
];

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Glob patterns a file must match to be included (empty = everything).
    pub include_patterns: Vec<String>,
    /// Glob patterns that exclude a file, unioned with [`DEFAULT_EXCLUDES`].
    pub exclude_patterns: Vec<String>,
    /// Per-file size ceiling in megabytes.
    pub max_file_size_mb: i32,
    /// Honor `.gitignore` files found along the walk.
    pub respect_gitignore: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/*".to_string()],
            exclude_patterns: Vec::new(),
            max_file_size_mb: 5,
            respect_gitignore: true,
        }
    }
}

/// Walks a directory tree and yields the files worth indexing.
pub struct FileScanner {
    include: GlobSet,
    exclude: GlobSet,
    max_file_size: u64,
    respect_gitignore: bool,
}

impl FileScanner {
    /// Build a scanner from configuration.
    ///
    /// Fails only when a configured glob pattern does not parse.
    pub fn new(config: &ScanConfig) -> Result<Self, globset::Error> {
        let mut include = GlobSetBuilder::new();
        for pattern in &config.include_patterns {
            include.add(Glob::new(&normalize_pattern(pattern))?);
        }
        if config.include_patterns.is_empty() {
            include.add(Glob::new("**/*")?);
        }

        let mut exclude = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .map(|p| (*p).to_string())
            .chain(config.exclude_patterns.iter().cloned())
        {
            exclude.add(Glob::new(&normalize_pattern(&pattern))?);
        }

        Ok(Self {
            include: include.build()?,
            exclude: exclude.build()?,
            max_file_size: config.max_file_size_mb.max(0) as u64 * 1024 * 1024,
            respect_gitignore: config.respect_gitignore,
        })
    }

    /// Walk `root` and return the matching files, sorted for determinism.
    pub fn scan(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = if self.respect_gitignore {
            self.scan_gitignore_aware(root)
        } else {
            self.scan_plain(root)
        };
        files.sort();
        files
    }

    /// Test a single path (relative to the scan root) against the filters.
    pub fn matches(&self, rel_path: &Path) -> bool {
        self.include.is_match(rel_path) && !self.exclude.is_match(rel_path)
    }

    fn scan_gitignore_aware(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        // require_git(false) keeps .gitignore semantics outside of a git
        // checkout; hidden(true) also skips dotfiles and dot-directories.
        let walk = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .follow_links(false)
            .build();

        for entry in walk.flatten() {
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if self.accepts(root, path) {
                files.push(path.to_path_buf());
            }
        }
        files
    }

    fn scan_plain(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if self.accepts(root, entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
        files
    }

    fn accepts(&self, root: &Path, path: &Path) -> bool {
        let rel = path.strip_prefix(root).unwrap_or(path);
        if !self.matches(rel) {
            return false;
        }
        match path.metadata() {
            Ok(meta) => meta.len() <= self.max_file_size,
            Err(_) => false,
        }
    }
}

/// Turn user-facing patterns into globset syntax.
///
/// `"node_modules/"` means "this directory anywhere in the tree" and
/// `"*.pyc"` means "this file name anywhere in the tree"; bare patterns
/// without a slash are anchored nowhere.
fn normalize_pattern(pattern: &str) -> String {
    if let Some(dir) = pattern.strip_suffix('/') {
        if dir.contains('/') {
            format!("{dir}/**")
        } else {
            format!("**/{dir}/**")
        }
    } else if pattern.contains('/') {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    }
}
