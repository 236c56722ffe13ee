use thiserror::Error;

/// Main error type for tutorsmith operations
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed model output in {stage}: {detail}")]
    MalformedModelOutput { stage: &'static str, detail: String },

    #[error("Chapter at position {position} ({abstraction}) came back empty")]
    EmptyChapterOutput { position: usize, abstraction: String },

    #[error("Language model unavailable: {0}")]
    LanguageModelUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
}

pub type Result<T> = std::result::Result<T, TutorError>;
