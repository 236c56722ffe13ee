// src/core/orderer.rs
use std::cmp::Reverse;

use tracing::{info, warn};

use crate::error::Result;
use super::llm::CachedModel;
use super::response::{parse_index, parse_yaml, sequence, ParseError, ParseResult};
use super::types::{Abstraction, Relationship};

/// Decides the teaching order of the abstractions
pub struct ChapterOrderer<'a> {
    model: &'a CachedModel,
    stage_retries: u32,
}

impl<'a> ChapterOrderer<'a> {
    pub fn new(model: &'a CachedModel) -> Self {
        Self { model, stage_retries: 2 }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.stage_retries = retries;
        self
    }

    /// Always returns a permutation of `0..abstractions.len()`. When the model
    /// never produces one, [`fallback_order`] is used instead.
    pub async fn order(
        &self,
        abstractions: &[Abstraction],
        relationships: &[Relationship],
        project_name: &str,
        summary: &str,
        use_cache: bool,
    ) -> Result<Vec<usize>> {
        let prompt = build_prompt(abstractions, relationships, project_name, summary);

        for attempt in 0..=self.stage_retries {
            let response = self.model.call(&prompt, use_cache).await?;
            match parse_order(&response, abstractions.len()) {
                Ok(order) => {
                    info!("Chapter order: {:?}", order);
                    return Ok(order);
                }
                Err(e) => {
                    warn!(
                        "Unusable chapter order (attempt {}/{}): {}",
                        attempt + 1,
                        self.stage_retries + 1,
                        e
                    );
                    self.model.evict(&prompt).await;
                }
            }
        }

        let order = fallback_order(abstractions.len(), relationships);
        warn!("Falling back to dependency-based chapter order {:?}", order);
        Ok(order)
    }
}

/// Abstractions with more outgoing edges first, ties broken by index
pub fn fallback_order(count: usize, relationships: &[Relationship]) -> Vec<usize> {
    let mut out_degree = vec![0usize; count];
    for relationship in relationships {
        if relationship.from < count && relationship.to < count {
            out_degree[relationship.from] += 1;
        }
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&index| (Reverse(out_degree[index]), index));
    order
}

fn build_prompt(abstractions: &[Abstraction], relationships: &[Relationship], project_name: &str, summary: &str) -> String {
    let listing: String = abstractions
        .iter()
        .map(|a| format!("- {} # {}\n", a.index, a.name))
        .collect();

    let mut context = format!("Project Summary:\n{}\n\nRelationships (indices refer to abstractions above):\n", summary);
    for relationship in relationships {
        let name = |index: usize| abstractions.get(index).map(|a| a.name.as_str()).unwrap_or("?");
        context.push_str(&format!(
            "- From {} ({}) to {} ({}): {}\n",
            relationship.from,
            name(relationship.from),
            relationship.to,
            name(relationship.to),
            relationship.label
        ));
    }

    format!(
        r#"Given the following project abstractions and their relationships for the project `{project}`:

Abstractions (Index # Name):
{listing}
Context about relationships and project summary:
{context}
If you were writing a tutorial for `{project}`, what is the best order to explain these abstractions, from first to last?
Start with the most important or foundational concepts, such as user-facing concepts or entry points. Then move on to lower-level implementation details and supporting concepts.

Output every abstraction index exactly once, as an ordered YAML list, with the name in a comment: `idx # AbstractionName`.

```yaml
- 2 # FoundationalConcept
- 0 # CoreClassA
- 1 # CoreClassB (uses CoreClassA)
```"#,
        project = project_name,
        listing = listing,
        context = context,
    )
}

/// Accept only a permutation of `0..count`
fn parse_order(response: &str, count: usize) -> ParseResult<Vec<usize>> {
    let doc = parse_yaml(response)?;
    let items = sequence(&doc, &["order", "chapters"])?;

    let mut order = Vec::with_capacity(items.len());
    let mut seen = vec![false; count];
    for item in items {
        let index = parse_index(item)
            .ok_or_else(|| ParseError::Shape(format!("not an abstraction index: {:?}", item)))?;
        if index >= count {
            return Err(ParseError::Shape(format!("index {} out of range 0..{}", index, count)));
        }
        if seen[index] {
            return Err(ParseError::Shape(format!("index {} listed twice", index)));
        }
        seen[index] = true;
        order.push(index);
    }

    if order.len() != count {
        return Err(ParseError::Shape(format!("{} of {} abstractions ordered", order.len(), count)));
    }
    Ok(order)
}
