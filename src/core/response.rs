//! Lenient parsing of structured model output
//!
//! Models are asked to answer with a fenced YAML block, but they wrap it in
//! prose, forget the language tag, or write indices as `"3 # src/app.py"`.
//! Everything here returns [`ParseError`] instead of panicking so the calling
//! stage can decide between retry, fallback and failure.

use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response was empty")]
    Empty,

    #[error("invalid YAML: {0}")]
    Yaml(String),

    #[error("unexpected structure: {0}")]
    Shape(String),
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// The body of the first fenced block (```yaml, ```yml or bare ```), or the whole
/// response when there is no fence
pub fn extract_yaml_block(response: &str) -> ParseResult<&str> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    for fence in ["```yaml", "```yml", "```YAML", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            // Skip the rest of the opening fence line
            let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
            let body = &after[body_start..];
            let body = match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            };
            if body.trim().is_empty() {
                return Err(ParseError::Empty);
            }
            return Ok(body);
        }
    }

    Ok(trimmed)
}

/// Parse the structured part of a response into a YAML value
pub fn parse_yaml(response: &str) -> ParseResult<Value> {
    let block = extract_yaml_block(response)?;
    serde_yaml::from_str(block).map_err(|e| ParseError::Yaml(e.to_string()))
}

/// An index written as `3`, `"3"`, `"3 # name"` or `3.0`
pub fn parse_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn leading_number(text: &str) -> Option<usize> {
    let pattern = Regex::new(r"^\s*(?:index\s*)?(\d+)").ok()?;
    pattern
        .captures(&text.to_lowercase())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A scalar as trimmed text; numbers and booleans are stringified
pub fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Look up `key` in a mapping, trying each alias in turn
pub fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mapping = value.as_mapping()?;
    keys.iter().find_map(|key| mapping.get(*key))
}

/// The value as a sequence, or the sequence stored under one of `keys`
pub fn sequence<'a>(value: &'a Value, keys: &[&str]) -> ParseResult<&'a Vec<Value>> {
    if let Some(items) = value.as_sequence() {
        return Ok(items);
    }
    field(value, keys)
        .and_then(Value::as_sequence)
        .ok_or_else(|| ParseError::Shape(format!("expected a list (or a mapping with one of {:?})", keys)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_yaml_with_surrounding_prose() {
        let response = "Here you go:\n```yaml\n- name: A\n```\nHope this helps!";
        assert_eq!(extract_yaml_block(response).unwrap().trim(), "- name: A");
    }

    #[test]
    fn test_accepts_bare_fence_and_unfenced_yaml() {
        assert_eq!(extract_yaml_block("```\nkey: 1\n```").unwrap().trim(), "key: 1");
        assert_eq!(extract_yaml_block("key: 1").unwrap(), "key: 1");
        // Unterminated fence still yields its body
        assert_eq!(extract_yaml_block("```yaml\nkey: 1\n").unwrap().trim(), "key: 1");
    }

    #[test]
    fn test_blank_responses_are_empty() {
        assert_eq!(extract_yaml_block("   \n "), Err(ParseError::Empty));
        assert_eq!(extract_yaml_block("```yaml\n\n```"), Err(ParseError::Empty));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        assert!(matches!(parse_yaml("```yaml\nkey: [unclosed\n```"), Err(ParseError::Yaml(_))));
    }

    #[test]
    fn test_index_formats() {
        let doc: Value = serde_yaml::from_str("[3, '4 # src/app.py', 'Index 5', 2.0, -1, name]").unwrap();
        let parsed: Vec<_> = doc.as_sequence().unwrap().iter().map(parse_index).collect();
        assert_eq!(parsed, vec![Some(3), Some(4), Some(5), Some(2), None, None]);
    }

    #[test]
    fn test_yaml_comments_after_index_are_dropped_by_yaml() {
        let doc = parse_yaml("```yaml\n- 2 # Foundation\n- 0 # Other\n```").unwrap();
        let parsed: Vec<_> = doc.as_sequence().unwrap().iter().map(parse_index).collect();
        assert_eq!(parsed, vec![Some(2), Some(0)]);
    }

    #[test]
    fn test_sequence_accepts_wrapped_list() {
        let doc: Value = serde_yaml::from_str("abstractions:\n  - a\n  - b").unwrap();
        assert_eq!(sequence(&doc, &["abstractions"]).unwrap().len(), 2);
        assert!(sequence(&doc, &["other"]).is_err());
    }
}
