use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::error::{TutorError, Result};
use super::FileSource;
use super::super::loader::PathFilter;
use super::super::types::SourceFile;

/// Files under a local directory, honouring `.gitignore`
pub struct LocalSource {
    root: PathBuf,
    max_file_size: Option<u64>,
    filter: Option<PathFilter>,
}

impl LocalSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size: None,
            filter: None,
        }
    }

    /// Don't descend into excluded directories or read files the filter rejects
    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Skip reading files larger than `bytes`
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[async_trait]
impl FileSource for LocalSource {
    async fn list(&self) -> Result<Vec<SourceFile>> {
        if !self.root.is_dir() {
            return Err(TutorError::SourceUnavailable(format!(
                "{} is not a readable directory",
                self.root.display()
            )));
        }

        let root = self.root.clone();
        let filter = self.filter.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .require_git(false)
            .filter_entry(move |entry| {
                if entry.file_name() == ".git" {
                    return false;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                match (&filter, is_dir) {
                    (Some(filter), true) => relative_path(&root, entry.path())
                        .map(|dir| !filter.excludes_dir(&dir))
                        .unwrap_or(true),
                    _ => true,
                }
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| TutorError::SourceUnavailable(e.to_string()))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            let Some(relative) = relative_path(&self.root, path) else {
                continue;
            };

            if let Some(filter) = &self.filter {
                if !filter.accepts(&relative) {
                    debug!("Skipping {} (filtered)", relative);
                    continue;
                }
            }

            if let Some(limit) = self.max_file_size {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > limit {
                    debug!("Skipping {} ({} bytes exceeds {})", relative, size, limit);
                    continue;
                }
            }

            match std::fs::read(path) {
                Ok(content) => files.push(SourceFile::new(relative, content)),
                Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Found {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn test_lists_relative_sorted_paths() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("src/main.py").write_str("print('hi')").unwrap();
        temp.child("README.md").write_str("# Demo").unwrap();
        temp.child("src/util/helpers.py").write_str("x = 1").unwrap();

        let files = LocalSource::new(temp.path()).list().await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.py", "src/util/helpers.py"]);
        assert_eq!(files[1].size, 11);
    }

    #[tokio::test]
    async fn test_respects_gitignore_and_skips_git_dir() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".gitignore").write_str("generated/\n").unwrap();
        temp.child("generated/out.py").write_str("junk").unwrap();
        temp.child(".git/config").write_str("[core]").unwrap();
        temp.child("app.py").write_str("pass").unwrap();

        let files = LocalSource::new(temp.path()).list().await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec![".gitignore", "app.py"]);
    }

    #[tokio::test]
    async fn test_size_hint_skips_large_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("big.py").write_str(&"x".repeat(100)).unwrap();
        temp.child("small.py").write_str("x").unwrap();

        let files = LocalSource::new(temp.path()).with_max_file_size(10).list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "small.py");
    }

    #[tokio::test]
    async fn test_filter_prunes_excluded_trees_before_reading() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("app.py").write_str("pass").unwrap();
        temp.child("notes.txt").write_str("todo").unwrap();
        for i in 0..5 {
            temp.child(format!("node_modules/pkg{}/index.js", i)).write_str("module.exports = {}").unwrap();
        }
        let filter = PathFilter::new(
            &["*.py".to_string(), "*.js".to_string()],
            &["*node_modules/*".to_string()],
        )
        .unwrap();

        let files = LocalSource::new(temp.path())
            .with_max_file_size(100_000)
            .with_filter(filter)
            .list()
            .await
            .unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.py"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_source_unavailable() {
        let err = LocalSource::new("/definitely/not/here").list().await.unwrap_err();
        assert!(matches!(err, TutorError::SourceUnavailable(_)));
    }
}
