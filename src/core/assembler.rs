//! Turns the finished chapters into the tutorial's Markdown files
//!
//! Assembly is pure: it renders everything in memory and hands back an
//! [`ArtifactSet`]. Writing to disk is left to [`TutorialWriter`](super::output::TutorialWriter)
//! so that a failed run never leaves half a tutorial behind.

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::Result;
use super::types::{Abstraction, Chapter, Relationship};

pub const INDEX_FILE: &str = "index.md";

const INDEX_TEMPLATE: &str = r#"# Tutorial: {{ project_name }}
{% if summary %}
{{ summary }}
{% endif %}
{%- if source_url %}
**Source Repository:** [{{ source_url }}]({{ source_url }})
{% endif %}
```mermaid
{{ diagram }}
```

## Chapters

{% for chapter in chapters -%}
{{ chapter.number }}. [{{ chapter.title }}]({{ chapter.file_name }})
{% endfor %}
---

Generated by tutorsmith
"#;

const CHAPTER_TEMPLATE: &str = r#"{{ body }}

---
{% if previous %}
Previous: [{{ previous.title }}]({{ previous.file_name }})
{% endif -%}
{% if next %}
Next: [{{ next.title }}]({{ next.file_name }})
{% else %}
Back to [Tutorial: {{ project_name }}]({{ index_file }})
{% endif %}
Generated by tutorsmith
"#;

/// Everything the assembler needs from a completed run
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub project_name: &'a str,
    pub summary: &'a str,
    /// Repository URL shown on the index page, if the code came from one
    pub source_url: Option<&'a str>,
    pub abstractions: &'a [Abstraction],
    pub relationships: &'a [Relationship],
    /// In chapter order
    pub chapters: &'a [Chapter],
}

/// One output file, named relative to the tutorial directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content: String,
}

/// The index followed by every chapter in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    pub files: Vec<Artifact>,
}

#[cfg(test)]
impl ArtifactSet {
    pub fn get(&self, file_name: &str) -> Option<&Artifact> {
        self.files.iter().find(|a| a.file_name == file_name)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChapterLink {
    number: usize,
    title: String,
    file_name: String,
}

impl ChapterLink {
    fn for_chapter(chapter: &Chapter) -> Self {
        Self {
            number: chapter.number(),
            title: chapter.title.clone(),
            file_name: chapter_file_name(chapter.number(), &chapter.title),
        }
    }
}

pub struct TutorialAssembler {
    tera: Tera,
}

impl TutorialAssembler {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![("index.md", INDEX_TEMPLATE), ("chapter.md", CHAPTER_TEMPLATE)])?;
        Ok(Self { tera })
    }

    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<ArtifactSet> {
        let links: Vec<ChapterLink> = input.chapters.iter().map(ChapterLink::for_chapter).collect();

        let mut context = Context::new();
        context.insert("project_name", input.project_name);
        context.insert("summary", input.summary.trim());
        context.insert("source_url", &input.source_url);
        context.insert("diagram", &relationship_diagram(input.abstractions, input.relationships));
        context.insert("chapters", &links);
        let index = self.tera.render("index.md", &context)?;

        let mut files = vec![Artifact {
            file_name: INDEX_FILE.to_string(),
            content: index,
        }];

        for (i, chapter) in input.chapters.iter().enumerate() {
            let previous = i.checked_sub(1).and_then(|p| links.get(p));
            let next = links.get(i + 1);

            let mut context = Context::new();
            context.insert("body", chapter.body.trim_end());
            context.insert("previous", &previous);
            context.insert("next", &next);
            context.insert("project_name", input.project_name);
            context.insert("index_file", INDEX_FILE);

            files.push(Artifact {
                file_name: links[i].file_name.clone(),
                content: self.tera.render("chapter.md", &context)?,
            });
        }

        Ok(ArtifactSet { files })
    }
}

/// `01_query_processing.md`
pub fn chapter_file_name(number: usize, title: &str) -> String {
    format!("{:02}_{}.md", number, slug(title))
}

/// Lowercase, runs of non-alphanumerics become one `_`
pub fn slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "chapter".to_string()
    } else {
        slug.to_string()
    }
}

/// Mermaid flowchart with one node per abstraction and one edge per relationship
pub fn relationship_diagram(abstractions: &[Abstraction], relationships: &[Relationship]) -> String {
    let mut lines = vec!["flowchart TD".to_string()];
    for abstraction in abstractions {
        lines.push(format!(
            "    A{}[\"{}\"]",
            abstraction.index,
            mermaid_text(&abstraction.name)
        ));
    }
    for relationship in relationships {
        lines.push(format!(
            "    A{} -- \"{}\" --> A{}",
            relationship.from,
            mermaid_text(&relationship.label),
            relationship.to
        ));
    }
    lines.join("\n")
}

fn mermaid_text(text: &str) -> String {
    text.replace('"', "").replace('\n', " ").trim().to_string()
}
