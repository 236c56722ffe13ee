// src/core/output.rs
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use super::assembler::ArtifactSet;

/// Writes an assembled tutorial into `{output_dir}/{project_name}/`
pub struct TutorialWriter {
    output_dir: PathBuf,
}

impl TutorialWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn tutorial_dir(&self, project_name: &str) -> PathBuf {
        self.output_dir.join(project_name)
    }

    /// Existing files with the same names are overwritten; other files are left alone
    pub fn write(&self, project_name: &str, artifacts: &ArtifactSet) -> Result<PathBuf> {
        let dir = self.tutorial_dir(project_name);
        std::fs::create_dir_all(&dir)?;

        for artifact in &artifacts.files {
            let path = dir.join(&artifact.file_name);
            std::fs::write(&path, &artifact.content)?;
            debug!("Wrote {}", path.display());
        }

        info!("📝 Wrote {} files to {}", artifacts.files.len(), dir.display());
        Ok(dir)
    }
}
