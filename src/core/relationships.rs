// src/core/relationships.rs
use std::collections::HashSet;

use serde_yaml::Value;
use tracing::{info, warn};

use crate::error::Result;
use super::llm::CachedModel;
use super::prompt::{file_excerpts, language_instruction};
use super::response::{field, parse_index, parse_yaml, scalar_text, sequence, ParseError, ParseResult};
use super::types::{Abstraction, Relationship, SourceFile};

/// Directed edges between abstractions plus a short project summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub relationships: Vec<Relationship>,
    pub summary: String,
}

/// Asks the model how the identified abstractions interact
pub struct RelationshipAnalyzer<'a> {
    model: &'a CachedModel,
    stage_retries: u32,
    excerpt_chars: usize,
}

impl<'a> RelationshipAnalyzer<'a> {
    pub fn new(model: &'a CachedModel) -> Self {
        Self {
            model,
            stage_retries: 2,
            excerpt_chars: 4_000,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.stage_retries = retries;
        self
    }

    /// Truncate each evidence file to `chars` in the prompt
    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    /// Unusable answers degrade to an empty analysis; only an unreachable model is an error
    pub async fn analyze(
        &self,
        abstractions: &[Abstraction],
        files: &[SourceFile],
        project_name: &str,
        language: &str,
        use_cache: bool,
    ) -> Result<Analysis> {
        let prompt = self.build_prompt(abstractions, files, project_name, language);

        for attempt in 0..=self.stage_retries {
            let response = self.model.call(&prompt, use_cache).await?;
            match parse_analysis(&response, abstractions.len()) {
                Ok(analysis) => {
                    info!(
                        "Found {} relationships between {} abstractions",
                        analysis.relationships.len(),
                        abstractions.len()
                    );
                    return Ok(analysis);
                }
                Err(e) => {
                    warn!(
                        "Unusable relationship analysis (attempt {}/{}): {}",
                        attempt + 1,
                        self.stage_retries + 1,
                        e
                    );
                    self.model.evict(&prompt).await;
                }
            }
        }

        warn!("Continuing without relationships or project summary");
        Ok(Analysis::default())
    }

    fn build_prompt(&self, abstractions: &[Abstraction], files: &[SourceFile], project_name: &str, language: &str) -> String {
        let mut listing = String::new();
        let mut evidence = Vec::new();
        for abstraction in abstractions {
            let indices: Vec<String> = abstraction.evidence.iter().map(|i| i.to_string()).collect();
            listing.push_str(&format!(
                "- Index {}: {} (Relevant file indices: [{}])\n  Description: {}\n",
                abstraction.index,
                abstraction.name,
                indices.join(", "),
                abstraction.description.replace('\n', " ")
            ));
            evidence.extend(abstraction.evidence.iter().copied());
        }
        let excerpts = file_excerpts(files, &evidence, self.excerpt_chars);
        let language_note = language_instruction(language, "the `summary` and every relationship `label`")
            .unwrap_or_default();

        format!(
            r#"Based on the following abstractions and relevant code snippets from the project `{project}`:

Identified Abstractions:
{listing}
Relevant File Snippets (referenced by index and path):
{excerpts}
{language_note}Please provide:
1. A high-level `summary` of the project's main purpose and functionality in a few beginner-friendly sentences. Use markdown formatting with **bold** and *italic* text to highlight important concepts.
2. A list (`relationships`) describing the key interactions between these abstractions. For each relationship specify:
    - `from_abstraction`: index of the source abstraction (e.g. `0 # AbstractionName1`)
    - `to_abstraction`: index of the target abstraction (e.g. `1 # AbstractionName2`)
    - `label`: a brief label for the interaction in just a few words (e.g. "Manages", "Inherits", "Uses").
    Only include relationships that the code supports. Use only the indices listed above.

Answer with YAML only:

```yaml
summary: |
  A brief, simple explanation of the project.
  Can span multiple lines with **bold** and *italic* for emphasis.
relationships:
  - from_abstraction: 0 # AbstractionName1
    to_abstraction: 1 # AbstractionName2
    label: "Manages"
  - from_abstraction: 2 # AbstractionName3
    to_abstraction: 0 # AbstractionName1
    label: "Provides config"
```"#,
            project = project_name,
            listing = listing,
            excerpts = excerpts,
            language_note = language_note,
        )
    }
}

/// Edges pointing at unknown abstractions are dropped with a warning,
/// self-loops and exact duplicates silently
fn parse_analysis(response: &str, abstraction_count: usize) -> ParseResult<Analysis> {
    let doc = parse_yaml(response)?;
    if doc.as_mapping().is_none() {
        return Err(ParseError::Shape("expected a mapping with `summary` and `relationships`".to_string()));
    }

    let summary = field(&doc, &["summary"]).and_then(scalar_text).unwrap_or_default();
    let items: &[Value] = match field(&doc, &["relationships"]) {
        None | Some(Value::Null) => &[],
        Some(_) => sequence(&doc, &["relationships"])?,
    };

    let mut seen = HashSet::new();
    let mut relationships = Vec::new();
    for item in items {
        let from = field(item, &["from_abstraction", "from"]).and_then(parse_index);
        let to = field(item, &["to_abstraction", "to"]).and_then(parse_index);
        let label = field(item, &["label"]).and_then(scalar_text).unwrap_or_default();

        let (Some(from), Some(to)) = (from, to) else {
            warn!("Dropping relationship without readable endpoints: {:?}", item);
            continue;
        };
        if from >= abstraction_count || to >= abstraction_count {
            warn!("Dropping relationship {} -> {} ({}): unknown abstraction", from, to, label);
            continue;
        }
        if from == to {
            continue;
        }

        let relationship = Relationship { from, to, label };
        if seen.insert(relationship.clone()) {
            relationships.push(relationship);
        }
    }

    Ok(Analysis { relationships, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::mock::{cached, ScriptedModel};
    use crate::core::llm::model::ModelError;
    use crate::error::TutorError;
    use std::sync::Arc;

    fn abstractions(count: usize) -> Vec<Abstraction> {
        (0..count)
            .map(|index| Abstraction {
                index,
                name: format!("Concept{}", index),
                description: format!("Concept number {}", index),
                evidence: vec![0],
            })
            .collect()
    }

    fn files() -> Vec<SourceFile> {
        vec![SourceFile::new("lib.py", b"print('hi')".to_vec())]
    }

    #[tokio::test]
    async fn test_edges_to_unknown_abstractions_are_dropped() {
        let answer = r#"```yaml
summary: |
  A **tiny** project.
relationships:
  - from_abstraction: 0 # Concept0
    to_abstraction: 1 # Concept1
    label: "Uses"
  - from_abstraction: 5 # Nobody
    to_abstraction: 0 # Concept0
    label: "Haunts"
```"#;
        let model = cached(Arc::new(ScriptedModel::constant(answer)));

        let analysis = RelationshipAnalyzer::new(&model)
            .analyze(&abstractions(3), &files(), "demo", "english", true)
            .await
            .unwrap();

        assert_eq!(
            analysis.relationships,
            vec![Relationship { from: 0, to: 1, label: "Uses".to_string() }]
        );
        assert_eq!(analysis.summary, "A **tiny** project.");
    }

    #[test]
    fn test_self_loops_and_duplicates_are_removed() {
        let answer = "summary: s\nrelationships:\n  - {from_abstraction: 1, to_abstraction: 1, label: Self}\n  - {from_abstraction: '0 # A', to_abstraction: '1 # B', label: Calls}\n  - {from_abstraction: 0, to_abstraction: 1, label: Calls}\n";
        let analysis = parse_analysis(answer, 2).unwrap();
        assert_eq!(analysis.relationships.len(), 1);
        assert_eq!(analysis.relationships[0].label, "Calls");
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let analysis = parse_analysis("summary: only a summary", 2).unwrap();
        assert!(analysis.relationships.is_empty());

        let analysis = parse_analysis("relationships: []", 2).unwrap();
        assert_eq!(analysis.summary, "");
    }

    #[tokio::test]
    async fn test_unusable_answers_degrade_to_empty_analysis() {
        let backend = Arc::new(ScriptedModel::constant("- just\n- a list\n"));
        let model = cached(backend.clone());

        let analysis = RelationshipAnalyzer::new(&model)
            .with_retries(1)
            .analyze(&abstractions(2), &files(), "demo", "english", true)
            .await
            .unwrap();

        assert_eq!(analysis, Analysis::default());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_model_is_an_error() {
        let failing = Arc::new(ScriptedModel::new(|_| {
            Err(ModelError::Api { status: 401, message: "bad key".to_string() })
        }));
        let model = cached(failing);

        let err = RelationshipAnalyzer::new(&model)
            .analyze(&abstractions(2), &files(), "demo", "english", true)
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::LanguageModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_prompt_includes_each_evidence_file_once() {
        let backend = Arc::new(ScriptedModel::constant("summary: s"));
        let model = cached(backend.clone());
        RelationshipAnalyzer::new(&model)
            .analyze(&abstractions(3), &files(), "demo", "english", true)
            .await
            .unwrap();
        assert_eq!(backend.prompts()[0].matches("--- File: 0 # lib.py ---").count(), 1);
    }
}
