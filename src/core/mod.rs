// src/core/mod.rs
mod engine;
mod context;
mod types;
mod prompt;
mod response;
mod llm;
mod source;

// Pipeline stages, in the order they run
mod loader;
mod abstractions;
mod relationships;
mod orderer;
mod chapter_writer;
mod assembler;
mod output;

pub use context::{module_label, PipelineContext, RunConfig, SourceSpec, Stage};
pub use llm::{create_model, CachedModel, LanguageModel, RetryPolicy};
pub use source::{FileSource, GithubSource, LocalSource};

pub use loader::{CodebaseLoader, PathFilter};
pub use abstractions::AbstractionIdentifier;
pub use relationships::RelationshipAnalyzer;
pub use orderer::ChapterOrderer;
pub use chapter_writer::{ChapterRequest, ChapterWriter};
pub use assembler::{AssemblyInput, TutorialAssembler};
pub use output::TutorialWriter;

// Export the main engine
pub use engine::{Engine, GenerateOptions};
