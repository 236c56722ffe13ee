use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{TutorError, Result};
use super::model::LanguageModel;
use super::retry::RetryPolicy;

/// Hit/miss counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub bypassed: usize,
}

#[derive(Serialize)]
struct CallLogRecord<'a> {
    timestamp: String,
    provider: &'a str,
    model: &'a str,
    cached: bool,
    prompt_digest: String,
    prompt: &'a str,
    response: &'a str,
}

/// Caching, retrying front for a [`LanguageModel`].
///
/// With `use_cache` set, each distinct prompt reaches the backend at most once
/// per process: the first caller initialises a per-prompt cell and concurrent
/// callers wait on it. Stored responses are flushed to `cache_path` (a JSON
/// object of prompt to response) after every new entry.
pub struct CachedModel {
    backend: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    cache_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    entries: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    flush_lock: tokio::sync::Mutex<()>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    bypassed: AtomicUsize,
}

impl CachedModel {
    /// In-memory cache only
    pub fn new(backend: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            cache_path: None,
            log_dir: None,
            entries: Mutex::new(HashMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            bypassed: AtomicUsize::new(0),
        }
    }

    /// Load previously persisted responses and keep `path` updated from now on.
    /// An unreadable or corrupt cache file is treated as empty.
    pub fn with_persistence<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let loaded = load_cache_file(&path);
        info!("Loaded {} cached responses from {}", loaded.len(), path.display());

        {
            let mut entries = self.entries_guard();
            for (prompt, response) in loaded {
                entries.insert(prompt, Arc::new(OnceCell::new_with(Some(response))));
            }
        }

        self.cache_path = Some(path);
        self
    }

    /// Append every call to `{dir}/llm_calls_YYYYMMDD.jsonl`
    pub fn with_call_log<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn provider_name(&self) -> &str {
        self.backend.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }

    /// Send `prompt` to the model, consulting the cache when `use_cache` is set
    pub async fn call(&self, prompt: &str, use_cache: bool) -> Result<String> {
        let digest = prompt_digest(prompt);

        if !use_cache {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            debug!(prompt = %digest, "cache bypassed");
            let response = self.generate(prompt).await?;
            self.log_call(prompt, &response, false);
            return Ok(response);
        }

        let cell = self.cell_for(prompt);
        if let Some(response) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(prompt = %digest, "cache hit");
            self.log_call(prompt, response, true);
            return Ok(response.clone());
        }

        let generated = AtomicBool::new(false);
        let response = cell
            .get_or_try_init(|| async {
                generated.store(true, Ordering::Relaxed);
                self.generate(prompt).await
            })
            .await?
            .clone();

        if generated.load(Ordering::Relaxed) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(prompt = %digest, "cache miss stored");
            self.log_call(prompt, &response, false);
            if let Err(e) = self.flush().await {
                warn!("Failed to persist response cache: {}", e);
            }
        } else {
            // Another caller filled the cell while we were waiting
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.log_call(prompt, &response, true);
        }

        Ok(response)
    }

    /// Forget the cached response for `prompt`, e.g. after it failed to parse
    pub async fn evict(&self, prompt: &str) {
        let removed = self.entries_guard().remove(prompt).is_some();
        if removed {
            debug!(prompt = %prompt_digest(prompt), "evicted cached response");
            if let Err(e) = self.flush().await {
                warn!("Failed to persist response cache: {}", e);
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let operation = format!("{} {}", self.backend.provider_name(), self.backend.model_name());
        self.retry
            .run(&operation, || self.backend.generate(prompt))
            .await
            .map_err(|(attempts, e)| {
                TutorError::LanguageModelUnavailable(format!(
                    "{} failed after {} attempt(s): {}",
                    operation, attempts, e
                ))
            })
    }

    fn cell_for(&self, prompt: &str) -> Arc<OnceCell<String>> {
        self.entries_guard()
            .entry(prompt.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn entries_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<String>>>> {
        // A poisoned map still holds valid entries
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries_guard()
            .iter()
            .filter_map(|(prompt, cell)| cell.get().map(|response| (prompt.clone(), response.clone())))
            .collect()
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };

        let _guard = self.flush_lock.lock().await;
        let content = serde_json::to_string_pretty(&self.snapshot())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn log_call(&self, prompt: &str, response: &str, cached: bool) {
        let Some(dir) = &self.log_dir else {
            return;
        };

        let now = chrono::Utc::now();
        let record = CallLogRecord {
            timestamp: now.to_rfc3339(),
            provider: self.backend.provider_name(),
            model: self.backend.model_name(),
            cached,
            prompt_digest: prompt_digest(prompt),
            prompt,
            response,
        };

        let path = dir.join(format!("llm_calls_{}.jsonl", now.format("%Y%m%d")));
        let written = std::fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .and_then(|mut file| {
                let line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
                writeln!(file, "{}", line)
            });
        if let Err(e) = written {
            warn!("Failed to append to call log {}: {}", path.display(), e);
        }
    }
}

fn load_cache_file(path: &Path) -> HashMap<String, String> {
    if !path.exists() {
        return HashMap::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
            HashMap::new()
        }),
        Err(e) => {
            warn!("Could not read cache file {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Short, stable identifier for a prompt in logs
pub(crate) fn prompt_digest(prompt: &str) -> String {
    let hash = Sha256::digest(prompt.as_bytes());
    hash.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}
