// src/core/abstractions.rs
use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::error::{TutorError, Result};
use super::llm::CachedModel;
use super::prompt::language_instruction;
use super::response::{field, parse_index, parse_yaml, scalar_text, sequence, ParseResult};
use super::types::{Abstraction, FileIndex, SourceFile};

const STAGE: &str = "identify abstractions";

/// Abstractions found in the codebase together with the context the model saw
#[derive(Debug, Clone)]
pub struct Identified {
    pub abstractions: Vec<Abstraction>,
    pub context_used: String,
}

/// An abstraction as parsed from one chunk, before merging
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    name: String,
    description: String,
    evidence: Vec<FileIndex>,
}

struct ChunkPlan {
    /// Global FileIndex of each chunk-local index
    files: Vec<FileIndex>,
    context: String,
    prompt: String,
}

/// Asks the model for the core abstractions of a codebase
pub struct AbstractionIdentifier<'a> {
    model: &'a CachedModel,
    stage_retries: u32,
    max_context_chars: usize,
    chunk_concurrency: usize,
}

impl<'a> AbstractionIdentifier<'a> {
    pub fn new(model: &'a CachedModel) -> Self {
        Self {
            model,
            stage_retries: 2,
            max_context_chars: 400_000,
            chunk_concurrency: 4,
        }
    }

    /// Extra attempts per chunk after a parse failure or empty answer
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.stage_retries = retries;
        self
    }

    /// Split the codebase into chunks once the context would exceed `chars`
    pub fn with_context_budget(mut self, chars: usize, concurrency: usize) -> Self {
        self.max_context_chars = chars.max(1);
        self.chunk_concurrency = concurrency.max(1);
        self
    }

    pub async fn identify(
        &self,
        files: &[SourceFile],
        project_name: &str,
        language: &str,
        max_abstractions: usize,
        use_cache: bool,
    ) -> Result<Identified> {
        let max_abstractions = max_abstractions.max(1);
        let plans: Vec<ChunkPlan> = plan_chunks(files, self.max_context_chars)
            .into_iter()
            .map(|chunk| {
                let context = build_context(files, &chunk);
                let prompt = build_prompt(&context, &chunk, files, project_name, language, max_abstractions);
                ChunkPlan { files: chunk, context, prompt }
            })
            .collect();

        info!(
            "Identifying up to {} abstractions across {} file(s) in {} chunk(s)",
            max_abstractions,
            files.len(),
            plans.len()
        );

        let outcomes: Vec<Result<ChunkOutcome>> = stream::iter(plans.iter())
            .map(|plan| self.identify_chunk(plan, max_abstractions, use_cache))
            .buffered(self.chunk_concurrency)
            .collect()
            .await;

        let mut per_chunk = Vec::with_capacity(outcomes.len());
        let mut problems = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            if let Some(problem) = outcome.problem {
                problems.push(problem);
            }
            per_chunk.push(outcome.candidates);
        }

        let abstractions = merge_chunks(per_chunk, max_abstractions);
        if abstractions.is_empty() {
            let detail = if problems.is_empty() {
                "no abstraction cited a valid file index".to_string()
            } else {
                problems.join("; ")
            };
            return Err(TutorError::MalformedModelOutput { stage: STAGE, detail });
        }

        for abstraction in &abstractions {
            debug!("Abstraction {}: {} ({} file(s))", abstraction.index, abstraction.name, abstraction.evidence.len());
        }
        info!("Identified {} abstractions", abstractions.len());

        let context_used = plans
            .iter()
            .map(|plan| plan.context.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Identified { abstractions, context_used })
    }

    async fn identify_chunk(&self, plan: &ChunkPlan, max_abstractions: usize, use_cache: bool) -> Result<ChunkOutcome> {
        let mut problem = String::new();

        for attempt in 0..=self.stage_retries {
            let response = self.model.call(&plan.prompt, use_cache).await?;
            match parse_abstractions(&response, plan.files.len(), max_abstractions) {
                Ok(found) if !found.is_empty() => {
                    return Ok(ChunkOutcome {
                        candidates: remap(found, &plan.files),
                        problem: None,
                    });
                }
                Ok(_) => problem = "no abstraction cited a valid file index".to_string(),
                Err(e) => problem = e.to_string(),
            }

            warn!(
                "Unusable abstraction list (attempt {}/{}): {}",
                attempt + 1,
                self.stage_retries + 1,
                problem
            );
            self.model.evict(&plan.prompt).await;
        }

        Ok(ChunkOutcome {
            candidates: Vec::new(),
            problem: Some(problem),
        })
    }
}

struct ChunkOutcome {
    candidates: Vec<Candidate>,
    problem: Option<String>,
}

fn section_header(index: usize, path: &str) -> String {
    format!("--- File Index {}: {} ---\n", index, path)
}

/// Characters a file adds to the context: listing line, header and content
fn section_cost(index: usize, file: &SourceFile) -> usize {
    let listing = format!("- {} # {}\n", index, file.path).chars().count();
    listing + section_header(index, &file.path).chars().count() + file.text().chars().count() + 2
}

/// Group files into windows, in load order, whose context stays within `budget`.
/// A file larger than the budget gets a chunk of its own; files are never split.
fn plan_chunks(files: &[SourceFile], budget: usize) -> Vec<Vec<FileIndex>> {
    let mut chunks = Vec::new();
    let mut current: Vec<FileIndex> = Vec::new();
    let mut used = 0;

    for (index, file) in files.iter().enumerate() {
        let cost = section_cost(current.len(), file);
        if !current.is_empty() && used + cost > budget {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += section_cost(current.len(), file);
        current.push(index);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// File sections of one chunk, numbered with chunk-local indices
fn build_context(files: &[SourceFile], chunk: &[FileIndex]) -> String {
    let mut context = String::new();
    for (local, &global) in chunk.iter().enumerate() {
        let file = &files[global];
        context.push_str(&section_header(local, &file.path));
        context.push_str(&file.text());
        context.push_str("\n\n");
    }
    context
}

fn build_prompt(
    context: &str,
    chunk: &[FileIndex],
    files: &[SourceFile],
    project_name: &str,
    language: &str,
    max_abstractions: usize,
) -> String {
    let listing: String = chunk
        .iter()
        .enumerate()
        .map(|(local, &global)| format!("- {} # {}\n", local, files[global].path))
        .collect();
    let language_note = language_instruction(language, "the `name` and `description` of every abstraction")
        .unwrap_or_default();

    format!(
        r#"For the project `{project}`:

Codebase Context:
{context}
{language_note}Analyze the codebase context.
Identify the top 5-{max} core abstractions a newcomer needs to understand this codebase.

For each abstraction provide:
1. A concise `name`.
2. A beginner-friendly `description` of what it is, with a simple analogy, in around 100 words.
3. A list of relevant `file_indices` (integers), written as `idx # path`.

Files present in the context:
{listing}
Answer with a YAML list only:

```yaml
- name: |
    Query Processing
  description: |
    Explains what the abstraction does.
    It is like a central dispatcher routing requests.
  file_indices:
    - 0 # path/to/file1.py
    - 3 # path/to/related.py
- name: |
    Query Optimization
  description: |
    Another core concept, similar to a blueprint for objects.
  file_indices:
    - 5 # path/to/another.js
```"#,
        project = project_name,
        context = context,
        language_note = language_note,
        max = max_abstractions,
        listing = listing,
    )
}

/// Parse one chunk's answer. Indices are chunk-local; out of range ones are
/// dropped, as are abstractions left without any evidence.
fn parse_abstractions(response: &str, file_count: usize, max_abstractions: usize) -> ParseResult<Vec<Candidate>> {
    let doc = parse_yaml(response)?;
    let items = sequence(&doc, &["abstractions"])?;

    let mut found = Vec::new();
    for item in items {
        let Some(candidate) = parse_candidate(item, file_count) else {
            continue;
        };
        found.push(candidate);
        if found.len() == max_abstractions {
            break;
        }
    }
    Ok(found)
}

fn parse_candidate(item: &Value, file_count: usize) -> Option<Candidate> {
    let name = field(item, &["name"]).and_then(scalar_text)?;
    let description = field(item, &["description"]).and_then(scalar_text).unwrap_or_default();

    let mut evidence = Vec::new();
    if let Some(indices) = field(item, &["file_indices", "files"]).and_then(Value::as_sequence) {
        for raw in indices {
            match parse_index(raw) {
                Some(index) if index < file_count => {
                    if !evidence.contains(&index) {
                        evidence.push(index);
                    }
                }
                _ => debug!("Dropping invalid file index {:?} for {}", raw, name),
            }
        }
    }

    if evidence.is_empty() {
        warn!("Ignoring abstraction '{}': no valid file indices", name);
        return None;
    }
    Some(Candidate { name, description, evidence })
}

/// Translate chunk-local evidence to global file indices
fn remap(candidates: Vec<Candidate>, chunk: &[FileIndex]) -> Vec<Candidate> {
    candidates
        .into_iter()
        .map(|mut candidate| {
            candidate.evidence = candidate.evidence.iter().map(|&local| chunk[local]).collect();
            candidate
        })
        .collect()
}

/// Interleave chunk results by rank, merge case-insensitive duplicates and re-index
fn merge_chunks(per_chunk: Vec<Vec<Candidate>>, max_abstractions: usize) -> Vec<Abstraction> {
    let deepest = per_chunk.iter().map(Vec::len).max().unwrap_or(0);
    let mut merged: Vec<Candidate> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for rank in 0..deepest {
        for chunk in &per_chunk {
            let Some(candidate) = chunk.get(rank) else {
                continue;
            };
            let key = candidate.name.to_lowercase();
            match by_name.get(&key) {
                Some(&existing) => {
                    let target = &mut merged[existing];
                    for &index in &candidate.evidence {
                        if !target.evidence.contains(&index) {
                            target.evidence.push(index);
                        }
                    }
                }
                None => {
                    by_name.insert(key, merged.len());
                    merged.push(candidate.clone());
                }
            }
        }
    }

    merged
        .into_iter()
        .take(max_abstractions)
        .enumerate()
        .map(|(index, candidate)| Abstraction {
            index,
            name: candidate.name,
            description: candidate.description,
            evidence: candidate.evidence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::mock::{cached, ScriptedModel};
    use std::sync::Arc;

    fn files() -> Vec<SourceFile> {
        vec![
            SourceFile::new("app/main.py", b"def main():\n    run()\n".to_vec()),
            SourceFile::new("app/engine.py", b"class Engine:\n    pass\n".to_vec()),
            SourceFile::new("app/store.py", b"class Store:\n    pass\n".to_vec()),
        ]
    }

    fn candidate(name: &str, evidence: &[usize]) -> Candidate {
        Candidate {
            name: name.to_string(),
            description: String::new(),
            evidence: evidence.to_vec(),
        }
    }

    const TWO_ABSTRACTIONS: &str = r#"Sure! Here they are:
```yaml
- name: |
    Engine
  description: |
    Runs the show.
  file_indices:
    - 1 # app/engine.py
    - "0 # app/main.py"
    - 42 # hallucinated
- name: Ghost
  description: Cites nothing real
  file_indices: [17, 99]
- name: Store
  description: Keeps data
  file_indices: ["2"]
```"#;

    #[tokio::test]
    async fn test_identify_keeps_only_resolvable_evidence() {
        let backend = Arc::new(ScriptedModel::constant(TWO_ABSTRACTIONS));
        let model = cached(backend.clone());
        let files = files();

        let found = AbstractionIdentifier::new(&model)
            .identify(&files, "demo", "english", 10, true)
            .await
            .unwrap();

        let names: Vec<_> = found.abstractions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Engine", "Store"]);
        assert_eq!(found.abstractions[0].evidence, vec![1, 0]);
        assert_eq!(found.abstractions[1].index, 1);
        for abstraction in &found.abstractions {
            assert!(abstraction.evidence.iter().all(|&i| i < files.len()));
        }
        assert!(found.context_used.contains("--- File Index 2: app/store.py ---"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_cap_truncates_abstractions() {
        let model = cached(Arc::new(ScriptedModel::constant(TWO_ABSTRACTIONS)));
        let found = AbstractionIdentifier::new(&model)
            .identify(&files(), "demo", "english", 1, true)
            .await
            .unwrap();
        assert_eq!(found.abstractions.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_answer_is_retried_against_the_backend() {
        let backend = Arc::new(ScriptedModel::sequence(vec![
            Ok("I'm not sure what you mean.".to_string()),
            Ok(TWO_ABSTRACTIONS.to_string()),
        ]));
        let model = cached(backend.clone());

        let found = AbstractionIdentifier::new(&model)
            .identify(&files(), "demo", "english", 10, true)
            .await
            .unwrap();

        assert_eq!(found.abstractions.len(), 2);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_nothing_valid_is_malformed_output() {
        let backend = Arc::new(ScriptedModel::constant("- name: Ghost\n  file_indices: [9]\n"));
        let model = cached(backend.clone());

        let err = AbstractionIdentifier::new(&model)
            .with_retries(1)
            .identify(&files(), "demo", "english", 10, true)
            .await
            .unwrap_err();

        assert!(matches!(err, TutorError::MalformedModelOutput { .. }));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_chunk_local_indices_are_remapped() {
        // Each chunk answers with its own local index 0
        let backend = Arc::new(ScriptedModel::new(|prompt: &str| {
            let name = if prompt.contains("- 0 # app/engine.py") {
                "Engine"
            } else if prompt.contains("- 0 # app/store.py") {
                "Store"
            } else {
                "Entry"
            };
            Ok(format!("- name: {}\n  description: d\n  file_indices: [0]\n", name))
        }));
        let model = cached(backend.clone());
        let files = files();

        let found = AbstractionIdentifier::new(&model)
            .with_context_budget(60, 2)
            .identify(&files, "demo", "english", 10, true)
            .await
            .unwrap();

        assert_eq!(backend.calls(), 3);
        let by_name: Vec<_> = found
            .abstractions
            .iter()
            .map(|a| (a.name.as_str(), a.evidence.clone()))
            .collect();
        assert_eq!(by_name, vec![("Entry", vec![0]), ("Engine", vec![1]), ("Store", vec![2])]);
    }

    #[tokio::test]
    async fn test_language_instruction_reaches_prompt() {
        let backend = Arc::new(ScriptedModel::constant(TWO_ABSTRACTIONS));
        let model = cached(backend.clone());
        AbstractionIdentifier::new(&model)
            .identify(&files(), "demo", "german", 10, false)
            .await
            .unwrap();
        assert!(backend.prompts()[0].contains("**German**"));
    }

    #[test]
    fn test_plan_chunks_never_splits_a_file() {
        let files = files();
        assert_eq!(plan_chunks(&files, 1_000_000), vec![vec![0, 1, 2]]);
        assert_eq!(plan_chunks(&files, 1), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_merge_interleaves_by_rank_and_merges_duplicates() {
        let merged = merge_chunks(
            vec![
                vec![candidate("Engine", &[0]), candidate("Config", &[1])],
                vec![candidate("engine", &[4]), candidate("Store", &[5]), candidate("Cache", &[6])],
            ],
            3,
        );
        let names: Vec<_> = merged.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Engine", "Config", "Store"]);
        assert_eq!(merged[0].evidence, vec![0, 4]);
        assert_eq!(merged.iter().map(|a| a.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
