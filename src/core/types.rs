use serde::{Deserialize, Serialize};

/// Position of a [`SourceFile`] in load order
pub type FileIndex = usize;

/// A loaded source file, immutable for the rest of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the codebase root, `/`-separated
    pub path: String,

    pub content: Vec<u8>,

    /// Size in bytes as reported by the source
    pub size: u64,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Self {
        let size = content.len() as u64;
        Self {
            path: path.into(),
            content,
            size,
        }
    }

    /// Content as text; invalid UTF-8 is replaced rather than rejected
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// A high-level concept the model found in the codebase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    /// 0-based, stable for the run
    pub index: usize,

    pub name: String,

    pub description: String,

    /// Files cited as evidence, each resolving to a loaded file
    pub evidence: Vec<FileIndex>,
}

/// A labelled, directed edge between two abstractions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

/// One generated tutorial chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub abstraction_index: usize,

    /// 0-based position in the chapter order; the chapter number is `position + 1`
    pub position: usize,

    pub title: String,

    pub body: String,
}

impl Chapter {
    pub fn number(&self) -> usize {
        self.position + 1
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_reports_size_and_lossy_text() {
        let file = SourceFile::new("src/lib.rs", vec![b'o', b'k', 0xff]);
        assert_eq!(file.size, 3);
        assert!(file.text().starts_with("ok"));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
