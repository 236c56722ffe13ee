// src/core/chapter_writer.rs
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{TutorError, Result};
use super::assembler::chapter_file_name;
use super::llm::CachedModel;
use super::prompt::{display_language, file_excerpts, is_english, language_instruction};
use super::types::{truncate_chars, Abstraction, Chapter, Relationship, SourceFile};

const DIGEST_CHARS: usize = 300;

/// What the writer needs to know to produce the chapter at `position`
#[derive(Debug, Clone, Copy)]
pub struct ChapterRequest<'a> {
    pub project_name: &'a str,
    pub abstractions: &'a [Abstraction],
    pub relationships: &'a [Relationship],
    pub files: &'a [SourceFile],
    pub order: &'a [usize],
    pub position: usize,
    /// Chapters already written, positions `0..position`
    pub prior_chapters: &'a [Chapter],
    pub language: &'a str,
}

impl<'a> ChapterRequest<'a> {
    fn abstraction(&self) -> &'a Abstraction {
        &self.abstractions[self.order[self.position]]
    }
}

/// Writes one tutorial chapter per call, strictly in chapter order
pub struct ChapterWriter<'a> {
    model: &'a CachedModel,
    stage_retries: u32,
    excerpt_chars: usize,
}

impl<'a> ChapterWriter<'a> {
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

    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    pub async fn write(&self, request: &ChapterRequest<'_>, use_cache: bool) -> Result<Chapter> {
        let abstraction = request.abstraction();
        let number = request.position + 1;
        info!("✍️ Writing chapter {}: {}", number, abstraction.name);

        let prompt = self.build_prompt(request);
        for attempt in 0..=self.stage_retries {
            let response = self.model.call(&prompt, use_cache).await?;
            let markdown = unwrap_markdown_fence(&response);
            if !markdown.trim().is_empty() {
                let title = extract_title(markdown).unwrap_or_else(|| abstraction.name.clone());
                let body = normalize_heading(markdown, number, &title);
                debug!("Chapter {} is {} chars", number, body.len());
                return Ok(Chapter {
                    abstraction_index: abstraction.index,
                    position: request.position,
                    title,
                    body,
                });
            }

            warn!(
                "Chapter {} came back empty (attempt {}/{})",
                number,
                attempt + 1,
                self.stage_retries + 1
            );
            self.model.evict(&prompt).await;
        }

        Err(TutorError::EmptyChapterOutput {
            position: request.position,
            abstraction: abstraction.name.clone(),
        })
    }

    /// The prompt for one chapter. Only chapters before `request.position`
    /// are mentioned by title; later chapters do not exist yet.
    pub fn build_prompt(&self, request: &ChapterRequest<'_>) -> String {
        let abstraction = request.abstraction();
        let number = request.position + 1;
        let name_of = |index: usize| {
            request
                .abstractions
                .get(index)
                .map(|a| a.name.as_str())
                .unwrap_or("?")
        };

        let mut connections = String::new();
        for relationship in request.relationships {
            if relationship.from == abstraction.index {
                connections.push_str(&format!("- {} → {}: {}\n", abstraction.name, name_of(relationship.to), relationship.label));
            } else if relationship.to == abstraction.index {
                connections.push_str(&format!("- {} → {}: {}\n", name_of(relationship.from), abstraction.name, relationship.label));
            }
        }
        if connections.is_empty() {
            connections.push_str("No recorded relationships.\n");
        }

        let mut previous = String::new();
        for chapter in request.prior_chapters.iter().take(request.position) {
            previous.push_str(&format!(
                "- Chapter {}: [{}]({})\n  {}\n",
                chapter.number(),
                chapter.title,
                chapter_file_name(chapter.number(), &chapter.title),
                chapter_digest(&chapter.body)
            ));
        }
        if previous.is_empty() {
            previous.push_str("This is the first chapter.\n");
        }

        let excerpts = file_excerpts(request.files, &abstraction.evidence, self.excerpt_chars);
        let excerpts = if excerpts.is_empty() {
            "No specific code snippets provided for this abstraction.\n".to_string()
        } else {
            excerpts
        };

        let language_note = language_instruction(
            request.language,
            "this entire chapter (headings, explanations, analogies and code comments)",
        )
        .unwrap_or_default();
        let output_language = if is_english(request.language) {
            "English".to_string()
        } else {
            display_language(request.language)
        };

        format!(
            r#"{language_note}Write a very beginner-friendly tutorial chapter (in Markdown) for the project `{project}` about the concept "{name}". This is Chapter {number}.

Concept Details:
- Name: {name}
- Description:
{description}

How it connects to other concepts:
{connections}
Previous chapters:
{previous}
Relevant Code Snippets (code itself stays unchanged):
{excerpts}
Instructions for the chapter (write it in {output_language}):
- Start with a clear heading, e.g. `# Chapter {number}: {name}`.
- If this is not the first chapter, open with a short transition from the previous one, linking to it with the Markdown link given above.
- Begin with the motivation: what problem does this abstraction solve? Anchor it in one concrete use case.
- Break a complex abstraction into key concepts and explain them one at a time.
- Show how to use it for the use case, with example inputs and outputs. Keep every code block under 10 lines and explain it right after.
- Describe how it works internally, first with a simple `sequenceDiagram` in a ```mermaid block (at most 5 participants), then with short references to the relevant files.
- When you mention a concept from an earlier chapter, link to that chapter with the Markdown link given above. Do not link to chapters that are not listed.
- Use analogies and examples throughout.
- End with a brief conclusion summarizing what was learned.
- Output *only* the Markdown content of this chapter, without wrapping it in a code fence.
"#,
            language_note = language_note,
            project = request.project_name,
            name = abstraction.name,
            number = number,
            description = abstraction.description,
            connections = connections,
            previous = previous,
            excerpts = excerpts,
            output_language = output_language,
        )
    }
}

/// First paragraph after the heading, bounded
fn chapter_digest(body: &str) -> String {
    let paragraph = body
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or("");
    let flat = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = truncate_chars(&flat, DIGEST_CHARS);
    if digest.len() < flat.len() {
        format!("{}...", digest)
    } else {
        digest.to_string()
    }
}

/// Some models wrap the whole chapter in ```markdown ... ```
fn unwrap_markdown_fence(response: &str) -> &str {
    let trimmed = response.trim();
    for fence in ["```markdown", "```md"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            if let Some(inner) = rest.strip_suffix("```") {
                return inner.trim_start_matches(|c: char| c != '\n').trim();
            }
        }
    }
    trimmed
}

fn heading_prefix() -> Option<Regex> {
    Regex::new(r"(?i)^chapter\s+\d+\s*[:.\-–]\s*").ok()
}

/// The leading Markdown heading, minus any `Chapter N:` prefix
fn extract_title(markdown: &str) -> Option<String> {
    let first = markdown.lines().find(|line| !line.trim().is_empty())?.trim();
    if !first.starts_with('#') {
        return None;
    }
    let heading = first.trim_start_matches('#').trim();
    let title = match heading_prefix() {
        Some(prefix) => prefix.replace(heading, "").trim().to_string(),
        None => heading.to_string(),
    };
    (!title.is_empty()).then_some(title)
}

/// Make the chapter start with `# Chapter {number}: {title}`
fn normalize_heading(markdown: &str, number: usize, title: &str) -> String {
    let heading = format!("# Chapter {}: {}", number, title);
    let trimmed = markdown.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    if first.trim_start().starts_with('#') {
        format!("{}\n{}", heading, rest)
    } else {
        format!("{}\n\n{}", heading, trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::mock::{cached, ScriptedModel};
    use std::sync::Arc;

    fn abstractions() -> Vec<Abstraction> {
        ["Engine", "Store", "Scheduler"]
            .iter()
            .enumerate()
            .map(|(index, name)| Abstraction {
                index,
                name: name.to_string(),
                description: format!("The {}", name),
                evidence: vec![0],
            })
            .collect()
    }

    fn files() -> Vec<SourceFile> {
        vec![SourceFile::new("core.py", b"def run(): pass".to_vec())]
    }

    fn written(position: usize, abstraction_index: usize, title: &str) -> Chapter {
        Chapter {
            abstraction_index,
            position,
            title: title.to_string(),
            body: format!("# Chapter {}: {}\n\nAll about {}.\n", position + 1, title, title),
        }
    }

    fn request<'a>(
        abstractions: &'a [Abstraction],
        relationships: &'a [Relationship],
        files: &'a [SourceFile],
        order: &'a [usize],
        position: usize,
        prior: &'a [Chapter],
    ) -> ChapterRequest<'a> {
        ChapterRequest {
            project_name: "demo",
            abstractions,
            relationships,
            files,
            order,
            position,
            prior_chapters: prior,
            language: "english",
        }
    }

    #[test]
    fn test_prompt_mentions_only_earlier_chapters() {
        let abstractions = abstractions();
        let files = files();
        let order = [2, 0, 1];
        let prior = vec![written(0, 2, "Scheduling Jobs")];
        let model = cached(Arc::new(ScriptedModel::constant("")));
        let writer = ChapterWriter::new(&model);

        let prompt = writer.build_prompt(&request(&abstractions, &[], &files, &order, 1, &prior));
        assert!(prompt.contains("Chapter 1: [Scheduling Jobs](01_scheduling_jobs.md)"));
        assert!(prompt.contains("All about Scheduling Jobs."));
        assert!(prompt.contains("This is Chapter 2."));
        assert!(prompt.contains("\"Engine\""));
        // Store is chapter 3 and must not be announced yet
        assert!(!prompt.contains("Store"));

        let first = writer.build_prompt(&request(&abstractions, &[], &files, &order, 0, &[]));
        assert!(first.contains("This is the first chapter."));
        assert!(!first.contains("Engine") && !first.contains("Store"));
    }

    #[test]
    fn test_prompt_lists_connections_by_name() {
        let abstractions = abstractions();
        let files = files();
        let relationships = vec![
            Relationship { from: 0, to: 1, label: "persists via".to_string() },
            Relationship { from: 2, to: 0, label: "drives".to_string() },
        ];
        let model = cached(Arc::new(ScriptedModel::constant("")));
        let prompt = ChapterWriter::new(&model)
            .build_prompt(&request(&abstractions, &relationships, &files, &[0, 1, 2], 0, &[]));

        assert!(prompt.contains("- Engine → Store: persists via"));
        assert!(prompt.contains("- Scheduler → Engine: drives"));
        assert!(prompt.contains("--- File: 0 # core.py ---"));
    }

    #[tokio::test]
    async fn test_title_comes_from_heading() {
        let model = cached(Arc::new(ScriptedModel::constant(
            "# Chapter 7: The Mighty Engine\n\nIt runs things.\n",
        )));
        let abstractions = abstractions();
        let files = files();

        let chapter = ChapterWriter::new(&model)
            .write(&request(&abstractions, &[], &files, &[0, 1, 2], 0, &[]), true)
            .await
            .unwrap();

        assert_eq!(chapter.title, "The Mighty Engine");
        assert_eq!(chapter.position, 0);
        assert_eq!(chapter.abstraction_index, 0);
        assert!(chapter.body.starts_with("# Chapter 1: The Mighty Engine\n\nIt runs things."));
    }

    #[tokio::test]
    async fn test_missing_heading_uses_abstraction_name() {
        let model = cached(Arc::new(ScriptedModel::constant("Just prose about storage.")));
        let abstractions = abstractions();
        let files = files();

        let chapter = ChapterWriter::new(&model)
            .write(&request(&abstractions, &[], &files, &[2, 1, 0], 1, &[written(0, 2, "Scheduler")]), true)
            .await
            .unwrap();

        assert_eq!(chapter.title, "Store");
        assert_eq!(chapter.body, "# Chapter 2: Store\n\nJust prose about storage.");
    }

    #[tokio::test]
    async fn test_blank_chapter_is_fatal_after_retries() {
        let backend = Arc::new(ScriptedModel::constant("  \n "));
        let model = cached(backend.clone());
        let abstractions = abstractions();
        let files = files();

        let err = ChapterWriter::new(&model)
            .with_retries(1)
            .write(&request(&abstractions, &[], &files, &[0, 1, 2], 0, &[]), true)
            .await
            .unwrap_err();

        assert!(matches!(err, TutorError::EmptyChapterOutput { position: 0, .. }));
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn test_title_extraction_variants() {
        assert_eq!(extract_title("## Chapter 3 - Routing\n"), Some("Routing".to_string()));
        assert_eq!(extract_title("\n# Caching Layer\ntext"), Some("Caching Layer".to_string()));
        assert_eq!(extract_title("# Chapter 2:\n"), None);
        assert_eq!(extract_title("plain text"), None);
    }

    #[test]
    fn test_markdown_fence_is_unwrapped() {
        assert_eq!(unwrap_markdown_fence("```markdown\n# Title\nBody\n```"), "# Title\nBody");
        assert_eq!(unwrap_markdown_fence("# Title"), "# Title");
    }

    #[test]
    fn test_digest_skips_heading_and_bounds_length() {
        let body = format!("# Chapter 1: X\n\n{}\n\nSecond paragraph.", "word ".repeat(200));
        let digest = chapter_digest(&body);
        assert!(digest.starts_with("word word"));
        assert!(digest.ends_with("..."));
        assert!(digest.chars().count() <= DIGEST_CHARS + 3);
    }
}
