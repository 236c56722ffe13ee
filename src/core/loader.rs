// src/core/loader.rs
use std::collections::HashSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::error::{TutorError, Result};
use super::source::FileSource;
use super::types::SourceFile;

/// Include/exclude globs over relative paths, shared with the sources so they
/// can skip excluded trees while walking
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include_patterns)?,
            exclude: build_globset(exclude_patterns)?,
        })
    }

    pub fn accepts(&self, path: &str) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }

    /// Whether every file below `dir` would be excluded, e.g. `node_modules` under `*node_modules/*`
    pub fn excludes_dir(&self, dir: &str) -> bool {
        let dir = dir.trim_end_matches('/');
        !dir.is_empty() && self.exclude.is_match(format!("{}/", dir))
    }
}

/// Applies include/exclude globs and a size ceiling to a source listing
pub struct CodebaseLoader {
    filter: PathFilter,
    max_file_size: u64,
}

impl CodebaseLoader {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String], max_file_size: u64) -> Result<Self> {
        Ok(Self {
            filter: PathFilter::new(include_patterns, exclude_patterns)?,
            max_file_size,
        })
    }

    /// Whether a file with this relative path and size belongs in the run
    pub fn accepts(&self, path: &str, size: u64) -> bool {
        self.filter.accepts(path) && size <= self.max_file_size
    }

    /// Load the filtered, de-duplicated files of `source`, preserving its order.
    /// The position of each file in the result is its FileIndex.
    pub async fn load(&self, source: &dyn FileSource) -> Result<Vec<SourceFile>> {
        let listing = source.list().await?;
        let listed = listing.len();

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for file in listing {
            if !self.accepts(&file.path, file.size) {
                debug!("Filtered out {} ({} bytes)", file.path, file.size);
                continue;
            }
            if !seen.insert(file.path.clone()) {
                debug!("Duplicate path {} ignored", file.path);
                continue;
            }
            files.push(file);
        }

        info!("Loaded {} of {} files from {}", files.len(), listed, source.describe());

        if files.is_empty() {
            return Err(TutorError::SourceUnavailable(format!(
                "no files in {} matched the include/exclude patterns",
                source.describe()
            )));
        }

        Ok(files)
    }
}

/// `*` also matches `/`, so `*tests/*` excludes nested test directories
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
