// src/core/engine.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::TutorError;
use super::{
    module_label, AbstractionIdentifier, AssemblyInput, CachedModel, ChapterOrderer, ChapterRequest,
    ChapterWriter, CodebaseLoader, FileSource, GithubSource, LanguageModel, LocalSource, PathFilter,
    PipelineContext, RelationshipAnalyzer, RetryPolicy, RunConfig, SourceSpec, Stage, TutorialAssembler,
    TutorialWriter,
};
use super::assembler::ArtifactSet;
use super::prompt::display_language;

const DEFAULT_CONFIG_FILE: &str = "tutorsmith.toml";

/// Overrides for one `generate` run; unset fields fall back to the config file
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub repo: Option<String>,
    pub dir: Option<PathBuf>,
    pub name: Option<String>,
    pub token: Option<String>,
    pub output: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_size: Option<u64>,
    pub language: Option<String>,
    pub no_cache: bool,
    pub max_abstractions: Option<usize>,
    /// Sub-directories that each get their own tutorial
    pub modules: Vec<String>,
}

/// Main orchestration engine: codebase in, tutorial directory out
pub struct Engine {
    config: Config,
}

impl Engine {
    /// Create an engine from the given config file, or the default locations
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Merge command-line overrides into the configured defaults
    pub fn resolve(&self, options: GenerateOptions) -> Result<RunConfig> {
        let source = match (options.repo, options.dir) {
            (Some(url), None) => SourceSpec::Repo { url, token: options.token },
            (None, Some(path)) => SourceSpec::Local { path },
            (Some(_), Some(_)) => {
                return Err(TutorError::Config("pass either --repo or --dir, not both".to_string()).into())
            }
            (None, None) => return Err(TutorError::Config("one of --repo or --dir is required".to_string()).into()),
        };

        let project_name = options
            .name
            .or_else(|| self.config.project.name.clone())
            .unwrap_or_else(|| source.default_project_name());

        let source_config = &self.config.source;
        let generation = &self.config.generation;
        let or_configured = |cli: Vec<String>, configured: &[String]| {
            if cli.is_empty() {
                configured.to_vec()
            } else {
                cli
            }
        };

        Ok(RunConfig {
            project_name,
            source,
            output_dir: options.output.unwrap_or_else(|| self.config.output.dir.clone()),
            include_patterns: or_configured(options.include, &source_config.include_patterns),
            exclude_patterns: or_configured(options.exclude, &source_config.exclude_patterns),
            max_file_size: options.max_size.unwrap_or(source_config.max_file_size),
            language: options.language.unwrap_or_else(|| generation.language.clone()),
            use_cache: generation.use_cache && !options.no_cache,
            max_abstractions: options.max_abstractions.unwrap_or(generation.max_abstractions).max(1),
            stage_retries: generation.stage_retries,
            max_context_chars: generation.max_context_chars,
            chunk_concurrency: generation.chunk_concurrency.max(1),
            excerpt_chars: generation.excerpt_chars,
        })
    }

    /// One run per configured module, or a single run over the whole source
    pub fn plan(&self, mut options: GenerateOptions) -> Result<Vec<RunConfig>> {
        let modules: Vec<String> = if options.modules.is_empty() {
            self.config.source.modules.clone()
        } else {
            std::mem::take(&mut options.modules)
        };
        let modules: Vec<String> = modules.into_iter().filter(|m| !module_label(m).is_empty()).collect();

        let base = self.resolve(options)?;
        if modules.is_empty() {
            return Ok(vec![base]);
        }
        Ok(modules.iter().map(|module| base.for_module(module)).collect())
    }

    /// Generate the tutorials and return the directories they were written to
    pub async fn generate(&self, options: GenerateOptions) -> Result<Vec<PathBuf>> {
        let runs = self.plan(options)?;
        let use_cache = runs.iter().all(|run| run.use_cache);
        let backend = super::create_model(&self.config.llm)?;
        let model = self.cached_model(backend, use_cache);

        if runs.iter().any(|run| lacks_token(&run.source)) {
            warn!("No GitHub token provided. You might hit rate limits for public repositories.");
        }
        info!("Model: {} {}", model.provider_name(), model.model_name());

        self.run_all(runs, &model).await
    }

    /// Run each unit in turn. A failed unit writes nothing and doesn't stop the
    /// ones after it, but the call still fails once all of them have been tried.
    pub async fn run_all(&self, runs: Vec<RunConfig>, model: &CachedModel) -> Result<Vec<PathBuf>> {
        let total = runs.len();
        let mut written = Vec::new();
        let mut failed = Vec::new();

        for run in runs {
            let name = run.project_name.clone();
            let result = match build_source(&run) {
                Ok(source) => {
                    info!(
                        "🚀 Generating tutorial for {} from {} in {} (LLM caching: {})",
                        run.project_name,
                        source.describe(),
                        display_language(&run.language),
                        if run.use_cache { "enabled" } else { "disabled" }
                    );
                    self.run(run, source.as_ref(), model).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(dir) => written.push(dir),
                Err(e) if total == 1 => return Err(e),
                Err(e) => {
                    error!("❌ Tutorial for {} failed: {:#}", name, e);
                    failed.push(name);
                }
            }
        }

        if !failed.is_empty() {
            return Err(anyhow!("{} of {} tutorials failed: {}", failed.len(), total, failed.join(", ")));
        }
        Ok(written)
    }

    /// Run every stage against `source`; artifacts are only written once all of them succeed
    pub async fn run(&self, run: RunConfig, source: &dyn FileSource, model: &CachedModel) -> Result<PathBuf> {
        let mut ctx = PipelineContext::new(run);
        let source_url = match &ctx.config.source {
            SourceSpec::Repo { url, .. } => Some(url.clone()),
            SourceSpec::Local { .. } => None,
        };

        let artifacts = self.produce(&mut ctx, source, model, source_url.as_deref()).await?;
        let dir = TutorialWriter::new(&ctx.config.output_dir)
            .write(&ctx.config.project_name, &artifacts)
            .context("Failed to write tutorial files")?;

        let stats = model.stats();
        info!(
            "✅ Tutorial complete: {} chapters in {} (model calls: {} cached, {} new, {} uncached)",
            ctx.chapters.len(),
            dir.display(),
            stats.hits,
            stats.misses,
            stats.bypassed
        );
        Ok(dir)
    }

    async fn produce(
        &self,
        ctx: &mut PipelineContext,
        source: &dyn FileSource,
        model: &CachedModel,
        source_url: Option<&str>,
    ) -> Result<ArtifactSet> {
        let use_cache = ctx.config.use_cache;

        // Step 1: load the codebase
        info!("📂 Loading files from {}", source.describe());
        let loader = CodebaseLoader::new(
            &ctx.config.include_patterns,
            &ctx.config.exclude_patterns,
            ctx.config.max_file_size,
        )?;
        ctx.files = loader
            .load(source)
            .await
            .with_context(|| format!("Failed while {}", Stage::FilesLoaded))?;
        ctx.complete(Stage::FilesLoaded);

        // Step 2: core abstractions
        info!("🔍 Identifying abstractions...");
        let identified = AbstractionIdentifier::new(model)
            .with_retries(ctx.config.stage_retries)
            .with_context_budget(ctx.config.max_context_chars, ctx.config.chunk_concurrency)
            .identify(
                &ctx.files,
                &ctx.config.project_name,
                &ctx.config.language,
                ctx.config.max_abstractions,
                use_cache,
            )
            .await
            .with_context(|| format!("Failed while {}", Stage::AbstractionsIdentified))?;
        debug!("Abstraction context was {} chars", identified.context_used.len());
        ctx.abstractions = identified.abstractions;
        ctx.complete(Stage::AbstractionsIdentified);

        // Step 3: how they relate
        info!("🔗 Analyzing relationships...");
        let analysis = RelationshipAnalyzer::new(model)
            .with_retries(ctx.config.stage_retries)
            .with_excerpt_chars(ctx.config.excerpt_chars)
            .analyze(
                &ctx.abstractions,
                &ctx.files,
                &ctx.config.project_name,
                &ctx.config.language,
                use_cache,
            )
            .await
            .with_context(|| format!("Failed while {}", Stage::RelationshipsAnalyzed))?;
        ctx.relationships = analysis.relationships;
        ctx.summary = analysis.summary;
        ctx.complete(Stage::RelationshipsAnalyzed);

        // Step 4: teaching order
        info!("📋 Ordering chapters...");
        ctx.order = ChapterOrderer::new(model)
            .with_retries(ctx.config.stage_retries)
            .order(
                &ctx.abstractions,
                &ctx.relationships,
                &ctx.config.project_name,
                &ctx.summary,
                use_cache,
            )
            .await
            .with_context(|| format!("Failed while {}", Stage::ChaptersOrdered))?;
        ctx.complete(Stage::ChaptersOrdered);

        // Step 5: chapters, one at a time so each can refer back to the ones before it
        let writer = ChapterWriter::new(model)
            .with_retries(ctx.config.stage_retries)
            .with_excerpt_chars(ctx.config.excerpt_chars);
        for position in 0..ctx.order.len() {
            let chapter = {
                let request = ChapterRequest {
                    project_name: &ctx.config.project_name,
                    abstractions: &ctx.abstractions,
                    relationships: &ctx.relationships,
                    files: &ctx.files,
                    order: &ctx.order,
                    position,
                    prior_chapters: &ctx.chapters,
                    language: &ctx.config.language,
                };
                writer
                    .write(&request, use_cache)
                    .await
                    .with_context(|| format!("Failed while {}", Stage::ChaptersWritten))?
            };
            ctx.chapters.push(chapter);
        }
        ctx.complete(Stage::ChaptersWritten);

        // Step 6: render
        info!("📚 Assembling tutorial...");
        let artifacts = TutorialAssembler::new()?
            .assemble(&AssemblyInput {
                project_name: &ctx.config.project_name,
                summary: &ctx.summary,
                source_url,
                abstractions: &ctx.abstractions,
                relationships: &ctx.relationships,
                chapters: &ctx.chapters,
            })
            .context("Failed to render tutorial")?;
        Ok(artifacts)
    }

    fn cached_model(&self, backend: Arc<dyn LanguageModel>, use_cache: bool) -> CachedModel {
        let mut model = CachedModel::new(backend, RetryPolicy::from_config(&self.config.llm));
        if use_cache {
            model = model.with_persistence(&self.config.generation.cache_file);
        }
        if let Some(dir) = &self.config.generation.log_dir {
            model = model.with_call_log(dir);
        }
        model
    }

    /// Write a default configuration file into `path` (or the current directory)
    pub async fn init(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let target_dir = match path {
            Some(dir) => dir,
            None => std::env::current_dir().context("Cannot determine current directory")?,
        };
        let config_path = target_dir.join(DEFAULT_CONFIG_FILE);
        if config_path.exists() {
            return Err(TutorError::Config(format!("{} already exists", config_path.display())).into());
        }

        std::fs::create_dir_all(&target_dir)?;
        Config::default().save(&config_path)?;
        info!("Wrote default configuration to {}", config_path.display());
        Ok(config_path)
    }
}

fn lacks_token(source: &SourceSpec) -> bool {
    match source {
        SourceSpec::Repo { token, .. } => token.as_deref().map_or(true, |t| t.trim().is_empty()),
        SourceSpec::Local { .. } => false,
    }
}

fn build_source(run: &RunConfig) -> Result<Box<dyn FileSource>> {
    let filter = PathFilter::new(&run.include_patterns, &run.exclude_patterns)?;
    Ok(match &run.source {
        SourceSpec::Repo { url, token } => Box::new(
            GithubSource::new(url, token.clone())?
                .with_max_file_size(run.max_file_size)
                .with_filter(filter),
        ),
        SourceSpec::Local { path } => Box::new(
            LocalSource::new(path)
                .with_max_file_size(run.max_file_size)
                .with_filter(filter),
        ),
    })
}
