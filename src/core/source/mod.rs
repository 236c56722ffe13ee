//! Where the codebase comes from
//!
//! Both sources return the same shape: every file they can see, as relative
//! `/`-separated paths sorted by path. Given the loader's
//! [`PathFilter`](super::loader::PathFilter) they skip excluded directories
//! and rejected files while walking, and the size hint skips oversized
//! files. The loader still applies both checks itself.

mod local;
mod github;

pub use local::LocalSource;
pub use github::GithubSource;

use async_trait::async_trait;

use crate::error::Result;
use super::types::SourceFile;

/// Capability to enumerate the files of a codebase
#[async_trait]
pub trait FileSource: Send + Sync {
    /// List every file with its content; fails with `SourceUnavailable` when enumeration fails
    async fn list(&self) -> Result<Vec<SourceFile>>;

    /// Human-readable origin for logs and the tutorial index
    fn describe(&self) -> String;
}
