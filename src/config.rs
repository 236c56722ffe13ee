use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TutorError, Result};

const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.go", "*.java", "*.pyi", "*.pyx",
    "*.c", "*.cc", "*.cpp", "*.h", "*.rs", "*.md", "*.rst", "*Dockerfile",
    "*Makefile", "*.yaml", "*.yml",
];

const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "assets/*", "data/*", "images/*", "public/*", "static/*", "temp/*",
    "*docs/*", "*venv/*", "*.venv/*", "*test*", "*tests/*", "*examples/*",
    "v1/*", "*dist/*", "*build/*", "*experimental/*", "*deprecated/*",
    "*misc/*", "*legacy/*", ".git/*", ".github/*", ".next/*", ".vscode/*",
    "*obj/*", "*bin/*", "*node_modules/*", "*.log",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider (openai, anthropic, gemini)
    pub provider: String,

    /// Model name (e.g., "gpt-4o", "claude-sonnet-4-20250514", "gemini-2.5-pro")
    pub model: String,

    /// API key; falls back to the provider's usual environment variable
    pub api_key: Option<String>,

    /// Base URL (for OpenAI-compatible endpoints such as Ollama or OpenRouter)
    pub base_url: Option<String>,

    /// Maximum tokens for LLM responses
    pub max_tokens: Option<u32>,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Backend attempts before giving up
    pub max_attempts: u32,

    /// First backoff delay in milliseconds, doubled per attempt
    pub initial_backoff_ms: u64,

    /// Ceiling for a single backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Source filtering configuration
    pub source: SourceConfig,

    /// Tutorial generation settings
    pub generation: GenerationConfig,

    /// Output settings
    pub output: OutputConfig,

    /// LLM integration settings
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name; derived from the repository or directory when absent
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Glob patterns a file must match to be loaded
    pub include_patterns: Vec<String>,

    /// Glob patterns that reject a file
    pub exclude_patterns: Vec<String>,

    /// Maximum file size to load (in bytes)
    pub max_file_size: u64,

    /// Sub-directories that each get their own tutorial; empty means the whole source
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Tutorial language
    pub language: String,

    /// Upper bound on identified abstractions (one chapter each)
    pub max_abstractions: usize,

    /// Whether model responses are cached between runs
    pub use_cache: bool,

    /// Location of the persisted response cache
    pub cache_file: PathBuf,

    /// Optional directory for the daily JSONL call log
    pub log_dir: Option<PathBuf>,

    /// Additional attempts a stage makes when the model output can't be parsed
    pub stage_retries: u32,

    /// Codebase context size (chars) above which abstraction identification is chunked
    pub max_context_chars: usize,

    /// Concurrent chunk requests during abstraction identification
    pub chunk_concurrency: usize,

    /// Per-file excerpt length (chars) used in relationship and chapter prompts
    pub excerpt_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for generated tutorials
    pub dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig { name: None },
            source: SourceConfig {
                include_patterns: DEFAULT_INCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
                exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
                max_file_size: 100_000,
                modules: Vec::new(),
            },
            generation: GenerationConfig {
                language: "english".to_string(),
                max_abstractions: 10,
                use_cache: true,
                cache_file: PathBuf::from("llm_cache.json"),
                log_dir: Some(PathBuf::from("logs")),
                stage_retries: 2,
                max_context_chars: 400_000,
                chunk_concurrency: 4,
                excerpt_chars: 4_000,
            },
            output: OutputConfig {
                dir: PathBuf::from("output"),
            },
            llm: LlmConfig {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                api_key: None,
                base_url: None,
                max_tokens: Some(8000),
                temperature: Some(0.3),
                request_timeout_secs: 300,
                max_attempts: 4,
                initial_backoff_ms: 2_000,
                max_backoff_ms: 60_000,
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TutorError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TutorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = [
                    "tutorsmith.toml",
                    ".tutorsmith.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Sanity checks that would otherwise surface as confusing failures mid-run
    pub fn validate(&self) -> Result<()> {
        if self.source.include_patterns.is_empty() {
            return Err(TutorError::Config("at least one include pattern is required".to_string()));
        }
        if self.generation.max_abstractions == 0 {
            return Err(TutorError::Config("max_abstractions must be at least 1".to_string()));
        }
        if self.generation.chunk_concurrency == 0 {
            return Err(TutorError::Config("chunk_concurrency must be at least 1".to_string()));
        }
        if self.llm.max_attempts == 0 {
            return Err(TutorError::Config("llm.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}
