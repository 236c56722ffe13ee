//! Language model integration for tutorial generation
//!
//! Stages never talk to a provider directly. They go through [`CachedModel`],
//! which adds exact-prompt response caching, per-call timeouts and bounded
//! retries on top of any [`LanguageModel`] backend.

pub mod model;
mod providers;
mod retry;
mod cache;

#[cfg(test)]
pub mod mock;

pub use model::LanguageModel;
pub use providers::create_model;
pub use retry::RetryPolicy;
pub use cache::CachedModel;
