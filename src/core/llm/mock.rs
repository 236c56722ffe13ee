//! Scripted backend for tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::model::{LanguageModel, ModelError};

type Responder = Box<dyn Fn(&str) -> Result<String, ModelError> + Send + Sync>;

/// Test double that answers from a closure and records every prompt it sees
pub struct ScriptedModel {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always returns `text`
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Replays `responses` in order, repeating the last one once the queue drains
    pub fn sequence(responses: Vec<Result<String, ModelError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap_or_else(|| Ok(String::new()))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt)
    }

    fn provider_name(&self) -> &str {
        "Scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }
}

/// A [`CachedModel`](super::CachedModel) over `backend` that retries quickly
pub fn cached(backend: std::sync::Arc<ScriptedModel>) -> super::CachedModel {
    let retry = super::RetryPolicy {
        max_attempts: 2,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(2),
        request_timeout: std::time::Duration::from_secs(5),
    };
    super::CachedModel::new(backend, retry)
}
