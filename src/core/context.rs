// src/core/context.rs
use std::fmt;
use std::path::PathBuf;

use super::types::{Abstraction, Chapter, Relationship, SourceFile};

/// Where the codebase is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Repo { url: String, token: Option<String> },
    Local { path: PathBuf },
}

impl SourceSpec {
    /// Last path segment of the repository URL or directory, used when no project name is given
    pub fn default_project_name(&self) -> String {
        let raw = match self {
            SourceSpec::Repo { url, .. } => url
                .trim_end_matches('/')
                .trim_end_matches(".git")
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            SourceSpec::Local { path } => path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if raw.is_empty() {
            "project".to_string()
        } else {
            raw
        }
    }

    /// The same source narrowed to the sub-directory `module`
    pub fn module(&self, module: &str) -> SourceSpec {
        let module = module.trim_matches('/');
        match self {
            SourceSpec::Repo { url, token } => {
                let base = url.trim_end_matches('/');
                let url = if base.contains("/tree/") {
                    format!("{}/{}", base, module)
                } else {
                    format!("{}/tree/HEAD/{}", base.trim_end_matches(".git"), module)
                };
                SourceSpec::Repo { url, token: token.clone() }
            }
            SourceSpec::Local { path } => SourceSpec::Local { path: path.join(module) },
        }
    }
}

/// Everything a run needs to know, resolved from config file and CLI flags
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub project_name: String,
    pub source: SourceSpec,
    pub output_dir: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub language: String,
    pub use_cache: bool,
    pub max_abstractions: usize,
    pub stage_retries: u32,
    pub max_context_chars: usize,
    pub chunk_concurrency: usize,
    pub excerpt_chars: usize,
}

impl RunConfig {
    /// Run settings for one module: its own source sub-directory, output
    /// directory `{output}/{module}` and project name `{project}-{module}`
    pub fn for_module(&self, module: &str) -> RunConfig {
        let label = module_label(module);
        RunConfig {
            project_name: format!("{}-{}", self.project_name, label),
            source: self.source.module(module),
            output_dir: self.output_dir.join(&label),
            ..self.clone()
        }
    }
}

/// `src/Saas.Admin` becomes `src-Saas.Admin`
pub fn module_label(module: &str) -> String {
    module
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Last stage that completed for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Created,
    FilesLoaded,
    AbstractionsIdentified,
    RelationshipsAnalyzed,
    ChaptersOrdered,
    ChaptersWritten,
}

impl Stage {
    /// The stage that runs after this one
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Created => Some(Stage::FilesLoaded),
            Stage::FilesLoaded => Some(Stage::AbstractionsIdentified),
            Stage::AbstractionsIdentified => Some(Stage::RelationshipsAnalyzed),
            Stage::RelationshipsAnalyzed => Some(Stage::ChaptersOrdered),
            Stage::ChaptersOrdered => Some(Stage::ChaptersWritten),
            Stage::ChaptersWritten => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "setup",
            Stage::FilesLoaded => "loading files",
            Stage::AbstractionsIdentified => "identifying abstractions",
            Stage::RelationshipsAnalyzed => "analyzing relationships",
            Stage::ChaptersOrdered => "ordering chapters",
            Stage::ChaptersWritten => "writing chapters",
        };
        f.write_str(name)
    }
}

/// State threaded through the stages of one run.
///
/// Created by the engine, mutated by exactly one stage at a time and dropped
/// once the artifacts are assembled. Nothing in here is treated as output
/// unless every stage completed.
#[derive(Debug)]
pub struct PipelineContext {
    pub config: RunConfig,
    pub files: Vec<SourceFile>,
    pub abstractions: Vec<Abstraction>,
    pub relationships: Vec<Relationship>,
    pub summary: String,
    pub order: Vec<usize>,
    pub chapters: Vec<Chapter>,
    pub stage: Stage,
}

impl PipelineContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            abstractions: Vec::new(),
            relationships: Vec::new(),
            summary: String::new(),
            order: Vec::new(),
            chapters: Vec::new(),
            stage: Stage::Created,
        }
    }

    /// Record that `stage` finished; stages complete strictly in order
    pub fn complete(&mut self, stage: Stage) {
        debug_assert_eq!(self.stage.next(), Some(stage), "stage completed out of order");
        self.stage = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_project_name_from_repo_url() {
        let spec = SourceSpec::Repo {
            url: "https://github.com/acme/widget-factory.git".to_string(),
            token: None,
        };
        assert_eq!(spec.default_project_name(), "widget-factory");

        let spec = SourceSpec::Repo {
            url: "https://github.com/acme/widgets/tree/main/src/Saas.Admin/".to_string(),
            token: None,
        };
        assert_eq!(spec.default_project_name(), "Saas.Admin");
    }

    fn base_run(source: SourceSpec) -> RunConfig {
        RunConfig {
            project_name: "widgets".to_string(),
            source,
            output_dir: PathBuf::from("out"),
            include_patterns: vec!["*.py".to_string()],
            exclude_patterns: Vec::new(),
            max_file_size: 100,
            language: "english".to_string(),
            use_cache: true,
            max_abstractions: 5,
            stage_retries: 1,
            max_context_chars: 1_000,
            chunk_concurrency: 1,
            excerpt_chars: 100,
        }
    }

    #[test]
    fn test_module_runs_get_their_own_source_and_output() {
        let repo = base_run(SourceSpec::Repo {
            url: "https://github.com/acme/widgets".to_string(),
            token: Some("t".to_string()),
        });
        let run = repo.for_module("src/Saas.Admin");
        assert_eq!(run.project_name, "widgets-src-Saas.Admin");
        assert_eq!(run.output_dir, PathBuf::from("out/src-Saas.Admin"));
        assert_eq!(
            run.source,
            SourceSpec::Repo {
                url: "https://github.com/acme/widgets/tree/HEAD/src/Saas.Admin".to_string(),
                token: Some("t".to_string()),
            }
        );

        let pinned = base_run(SourceSpec::Repo {
            url: "https://github.com/acme/widgets/tree/main/src/".to_string(),
            token: None,
        });
        match pinned.for_module("Saas.Lib").source {
            SourceSpec::Repo { url, .. } => assert_eq!(url, "https://github.com/acme/widgets/tree/main/src/Saas.Lib"),
            other => panic!("unexpected source {:?}", other),
        }

        let local = base_run(SourceSpec::Local { path: PathBuf::from("code") }).for_module("core/");
        assert_eq!(local.source, SourceSpec::Local { path: PathBuf::from("code/core") });
        assert_eq!(local.project_name, "widgets-core");
        assert_eq!(local.include_patterns, vec!["*.py"]);
    }

    #[test]
    fn test_stages_advance_in_order() {
        let mut stage = Stage::Created;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(stage, Stage::ChaptersWritten);
    }
}
